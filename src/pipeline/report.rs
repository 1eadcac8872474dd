//! Rendering chain results
//!
//! Text for terminals, JSON lines for log aggregation and TAP for CI systems.

use serde_json::json;

use super::runner::ChainExecutionResult;

/// Report format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    /// Human readable summary
    #[default]
    Text,
    /// One JSON object per step plus a summary line
    Json,
    /// Test Anything Protocol
    Tap,
}

/// Summary of a chain run for quick display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tests_failed: usize,
    pub total_time_ms: u64,
}

impl ChainSummary {
    pub fn from_results(results: &[ChainExecutionResult]) -> Self {
        Self {
            total: results.len(),
            passed: results.iter().filter(|r| r.success).count(),
            failed: results.iter().filter(|r| r.failed_to_run()).count(),
            skipped: results.iter().filter(|r| r.skipped).count(),
            tests_failed: results
                .iter()
                .flat_map(|r| r.tests.iter().flatten())
                .filter(|t| !t.passed)
                .count(),
            total_time_ms: results.iter().map(|r| r.duration_ms).sum(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.tests_failed == 0
    }
}

pub fn render_report(name: &str, results: &[ChainExecutionResult], format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => format_chain_results(name, results),
        ReportFormat::Json => format_chain_results_json(name, results),
        ReportFormat::Tap => format_chain_results_tap(results),
    }
}

fn status_label(result: &ChainExecutionResult) -> String {
    if result.skipped {
        "SKIPPED".to_string()
    } else {
        result
            .status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "---".to_string())
    }
}

/// Format chain results for a terminal
pub fn format_chain_results(name: &str, results: &[ChainExecutionResult]) -> String {
    let rule = "=".repeat(67);
    let mut output = String::new();
    output.push_str(&format!("\n{}\n  CHAIN {}\n{}\n\n", rule, name, rule));

    for (i, result) in results.iter().enumerate() {
        let icon = if result.skipped {
            "-"
        } else if result.success {
            "✓"
        } else {
            "✗"
        };
        output.push_str(&format!(
            "  {} Step {}: {} ({})\n",
            icon,
            i + 1,
            result.step_id,
            status_label(result)
        ));

        if let Some(url) = &result.resolved_url {
            output.push_str(&format!("      URL: {}\n", url));
            output.push_str(&format!("      Time: {}ms\n", result.duration_ms));
        }
        if let Some(error) = &result.error {
            output.push_str(&format!("      Error: {}\n", error));
        }
        for test in result.tests.iter().flatten() {
            let icon = if test.passed { "✓" } else { "✗" };
            match &test.message {
                Some(message) => output.push_str(&format!("        {} {}: {}\n", icon, test.name, message)),
                None => output.push_str(&format!("        {} {}\n", icon, test.name)),
            }
        }
        if let Some(extracted) = result.extracted_data.as_ref().filter(|e| !e.is_empty()) {
            output.push_str("      Extracted:\n");
            for (key, value) in extracted {
                output.push_str(&format!("        {} = {}\n", key, value));
            }
        }
        output.push('\n');
    }

    let summary = ChainSummary::from_results(results);
    output.push_str(&format!("{}\n", "-".repeat(67)));
    output.push_str(&format!(
        "  Total: {} | Passed: {} | Failed: {} | Skipped: {} | Failed tests: {}\n",
        summary.total, summary.passed, summary.failed, summary.skipped, summary.tests_failed
    ));
    output.push_str(&format!("{}\n", rule));
    output
}

/// One JSON line per step, then a summary line
pub fn format_chain_results_json(name: &str, results: &[ChainExecutionResult]) -> String {
    let mut output = String::new();

    for result in results {
        let line = json!({
            "level": if result.failed_to_run() { "error" } else { "info" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "step_result",
            "chain": name,
            "step_id": result.step_id,
            "url": result.resolved_url,
            "status_code": result.status(),
            "duration_ms": result.duration_ms,
            "success": result.success,
            "skipped": result.skipped,
            "error": result.error,
            "tests_passed": result.tests.iter().flatten().filter(|t| t.passed).count(),
            "tests_failed": result.tests.iter().flatten().filter(|t| !t.passed).count(),
            "extracted": result.extracted_data,
        });
        output.push_str(&line.to_string());
        output.push('\n');
    }

    let summary = ChainSummary::from_results(results);
    let line = json!({
        "level": "info",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "chain_summary",
        "chain": name,
        "total": summary.total,
        "passed": summary.passed,
        "failed": summary.failed,
        "skipped": summary.skipped,
        "tests_failed": summary.tests_failed,
        "total_time_ms": summary.total_time_ms,
        "success": summary.all_passed(),
    });
    output.push_str(&line.to_string());
    output.push('\n');
    output
}

/// TAP version 14 output
pub fn format_chain_results_tap(results: &[ChainExecutionResult]) -> String {
    let mut output = String::new();
    output.push_str("TAP version 14\n");
    output.push_str(&format!("1..{}\n", results.len()));

    for (i, result) in results.iter().enumerate() {
        let number = i + 1;
        if result.skipped {
            output.push_str(&format!(
                "ok {} - {} # SKIP {}\n",
                number,
                result.step_id,
                result.error.as_deref().unwrap_or_default()
            ));
        } else if result.success && result.tests_passed() {
            output.push_str(&format!("ok {} - {} # time={}ms\n", number, result.step_id, result.duration_ms));
        } else {
            output.push_str(&format!("not ok {} - {}\n", number, result.step_id));
            output.push_str("  ---\n");
            if let Some(url) = &result.resolved_url {
                output.push_str(&format!("  url: {}\n", url));
            }
            if let Some(status) = result.status() {
                output.push_str(&format!("  status: {}\n", status));
            }
            if let Some(error) = &result.error {
                output.push_str(&format!("  error: {}\n", error));
            }
            let failures: Vec<_> = result.tests.iter().flatten().filter(|t| !t.passed).collect();
            if !failures.is_empty() {
                output.push_str("  failures:\n");
                for test in failures {
                    output.push_str(&format!(
                        "    - {}: {}\n",
                        test.name,
                        test.message.as_deref().unwrap_or_default()
                    ));
                }
            }
            output.push_str("  ...\n");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::scripting::{TestResult, VariableMap};

    fn passing(id: &str) -> ChainExecutionResult {
        ChainExecutionResult {
            step_id: id.to_string(),
            success: true,
            skipped: false,
            response: Some(HttpResponse::new(200, "{}")),
            error: None,
            extracted_data: Some(VariableMap::from([("id".to_string(), serde_json::json!(1))])),
            resolved_url: Some("https://api.example.com/test".to_string()),
            tests: Some(vec![TestResult {
                name: "status".into(),
                passed: true,
                message: None,
                duration: Some(0.2),
            }]),
            duration_ms: 150,
        }
    }

    fn failing(id: &str) -> ChainExecutionResult {
        ChainExecutionResult {
            success: false,
            response: Some(HttpResponse::new(404, "missing")),
            tests: Some(vec![TestResult {
                name: "has id".into(),
                passed: false,
                message: Some("Expected object to have property id".into()),
                duration: Some(0.1),
            }]),
            ..passing(id)
        }
    }

    fn skipped(id: &str) -> ChainExecutionResult {
        ChainExecutionResult {
            step_id: id.to_string(),
            success: false,
            skipped: true,
            response: None,
            error: Some("Condition not met, skipping step".into()),
            extracted_data: None,
            resolved_url: None,
            tests: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_chain_summary() {
        let results = vec![passing("login"), failing("profile"), skipped("logout")];
        let summary = ChainSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.tests_failed, 1);
        assert_eq!(summary.total_time_ms, 300);
        assert!(!summary.all_passed());
    }

    #[test]
    fn test_text_report() {
        let text = format_chain_results("users", &[passing("login"), skipped("logout")]);
        assert!(text.contains("CHAIN users"));
        assert!(text.contains("✓ Step 1: login (200)"));
        assert!(text.contains("- Step 2: logout (SKIPPED)"));
        assert!(text.contains("id = 1"));
        assert!(text.contains("Total: 2 | Passed: 1 | Failed: 0 | Skipped: 1"));
    }

    #[test]
    fn test_json_lines_report() {
        let out = format_chain_results_json("users", &[passing("login"), failing("profile")]);
        let lines: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["level"], "error");
        assert_eq!(lines[1]["status_code"], 404);
        assert_eq!(lines[2]["event"], "chain_summary");
        assert_eq!(lines[2]["success"], false);
    }

    #[test]
    fn test_tap_report() {
        let out = format_chain_results_tap(&[passing("login"), failing("profile"), skipped("logout")]);
        assert!(out.contains("1..3"));
        assert!(out.contains("ok 1 - login"));
        assert!(out.contains("not ok 2 - profile"));
        assert!(out.contains("    - has id: Expected object to have property id"));
        assert!(out.contains("ok 3 - logout # SKIP"));
    }
}
