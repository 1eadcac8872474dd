//! Command line front end
//!
//! A thin shell over the library: every subcommand builds the pieces from
//! [`Config`] and hands off to `pipeline`, `scripting` or `cache`.

pub mod args;
pub mod env;

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{FileStore, ResponseCache};
use crate::client::{RequestExecutor, ReqwestTransport, UrlSecurityPolicy};
use crate::config::Config;
use crate::errors::{PulsechainError, Result};
use crate::http::HttpRequest;
use crate::pipeline::{load_chain, render_report, ChainExecutor, ChainSummary, FailurePolicy, EXIT_CHAIN_FAILED};
use crate::scripting::TestEngine;

pub use args::{Args, CacheAction, Command};
pub use env::{collect_environment, parse_env_file, parse_env_pair};

/// Run a parsed command line and return the process exit code
pub async fn run(args: Args) -> Result<i32> {
    let config = Config::load(args.config.as_deref())?;
    let environment = collect_environment(args.env_file.as_deref(), &args.env)?;

    match &args.command {
        Command::Run { file, format, stop_on_error, validate } => {
            let chain = load_chain(file)?;
            let warnings = chain.validate().map_err(|errors| PulsechainError::Validation(errors.join("\n")))?;
            for warning in &warnings {
                tracing::warn!("{}", warning);
            }
            if *validate {
                println!("Chain '{}' is valid ({} steps)", chain.name, chain.steps.len());
                return Ok(0);
            }

            let mut options = config.chain_options();
            if *stop_on_error {
                options.failure_policy = FailurePolicy::StopOnError;
            }
            options.use_cache &= !args.no_cache;

            let executor = Arc::new(build_executor(&config, args.no_cache)?);
            let runner = ChainExecutor::new(executor).with_options(options);

            // Caller-supplied values win over the chain's defaults
            let mut variables = chain.variables.clone();
            variables.extend(environment);

            let results = runner.execute_chain(&chain.steps, variables).await;
            print!("{}", render_report(&chain.name, &results, *format));
            flush_stdout();

            let summary = ChainSummary::from_results(&results);
            Ok(if summary.all_passed() { 0 } else { EXIT_CHAIN_FAILED })
        }

        Command::Test { url, method, headers, data, file, script, json } => {
            let script = match (script, file) {
                (Some(inline), _) => inline.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => return Err(PulsechainError::Validation("No test script given".into())),
            };

            let mut request = HttpRequest::new(method, url.as_str())?;
            for header in headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| PulsechainError::Validation(format!("Invalid header '{}'. Use 'Name: value'", header)))?;
                request = request.with_header(name.trim(), value.trim());
            }
            if let Some(body) = data {
                request = request.with_body(body.as_str());
            }

            let executor = build_executor(&config, args.no_cache)?;
            let started = Instant::now();
            let response = executor.execute_request(&request, !args.no_cache, None).await?;
            let elapsed = started.elapsed();

            let mut engine = TestEngine::with_environment(environment);
            let results = engine.run_tests(&script, &response, &request, elapsed);

            if *json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("{} {} -> {} ({}ms)", request.method, request.url, response.status, elapsed.as_millis());
                for result in &results {
                    let icon = if result.passed { "✓" } else { "✗" };
                    match &result.message {
                        Some(message) => println!("  {} {}: {}", icon, result.name, message),
                        None => println!("  {} {}", icon, result.name),
                    }
                }
                let passed = results.iter().filter(|r| r.passed).count();
                println!("{}/{} tests passed", passed, results.len());
            }

            Ok(if results.iter().all(|r| r.passed) { 0 } else { EXIT_CHAIN_FAILED })
        }

        Command::Cache { action } => {
            let cache = open_cache(&config);
            match action {
                CacheAction::Stats { json } => {
                    let stats = cache.stats().await;
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    } else {
                        println!("Location:     {}", config.cache_dir().display());
                        println!("Entries:      {}", stats.total_entries);
                        println!("  memory:     {}", stats.memory_entries);
                        println!("  persistent: {}", stats.persistent_entries);
                        println!("Memory bytes: {}", stats.memory_bytes);
                    }
                }
                CacheAction::Clear => {
                    cache.clear().await;
                    println!("Cache cleared");
                }
                CacheAction::Invalidate { pattern } => {
                    let removed = cache.invalidate(pattern).await;
                    println!("Removed {} entries", removed);
                }
            }
            Ok(0)
        }
    }
}

fn open_cache(config: &Config) -> ResponseCache {
    ResponseCache::new(config.cache_settings(), Arc::new(FileStore::new(config.cache_dir())))
}

/// Request executor wired from config: retry, timeout, URL policy and cache
pub fn build_executor(config: &Config, no_cache: bool) -> Result<RequestExecutor> {
    let mut executor = RequestExecutor::new(Arc::new(ReqwestTransport::new()?))
        .with_retry(config.retry_options())
        .with_timeout(config.request.timeout)
        .with_default_ttl(config.cache.default_ttl)
        .with_security(Arc::new(UrlSecurityPolicy::new(config.security.require_https)));

    if config.cache.enabled && !no_cache {
        executor = executor.with_cache(Arc::new(open_cache(config)));
    }

    Ok(executor)
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_executor_respects_cache_switches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.directory = Some(dir.path().to_path_buf());

        assert!(build_executor(&config, false).unwrap().cache().is_some());
        assert!(build_executor(&config, true).unwrap().cache().is_none());

        config.cache.enabled = false;
        assert!(build_executor(&config, false).unwrap().cache().is_none());
    }
}
