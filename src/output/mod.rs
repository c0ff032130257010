//! Output formatting and management

use colored::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};

use crate::engine::DetectionReport;
use crate::fingerprint::report::Verdict;
use crate::vuln::VulnerabilityVerdict;

/// Output format options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<String>,
    pub colored: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
            colored: true,
        }
    }
}

/// Renders detection reports
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        if !config.colored {
            colored::control::set_override(false);
        }
        Self { config }
    }

    /// Write the report to the configured destination
    pub fn write_report(&self, report: &DetectionReport) -> crate::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => self.format_text(report),
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .map_err(|e| crate::DetectError::OutputError(e.to_string()))?,
        };

        match &self.config.file {
            Some(filename) => {
                let mut file = File::create(filename)?;
                file.write_all(output.as_bytes())?;
            }
            None => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle.write_all(output.as_bytes())?;
            }
        }

        Ok(())
    }

    /// Format the report as human-readable text
    fn format_text(&self, report: &DetectionReport) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{} Probed {}:{} at {}\n",
            "[~]".bright_blue(),
            report.host,
            report.port,
            report.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        for score in &report.fingerprint.scores {
            output.push_str(&format!(
                "    {:<28} {:>5}   {}\n",
                score.probe,
                format_contribution(score.contribution),
                score.rationale.dimmed()
            ));
        }
        output.push_str(&format!(
            "    {:<28} {:>5}\n",
            "total".bold(),
            report.fingerprint.total_score
        ));

        let verdict_line = match report.fingerprint.verdict {
            Verdict::VxWorksIPnetDetected => format!(
                "{} {} detected as {}",
                "[*]".bright_green(),
                report.host,
                "VxWorks (IPnet)".bright_green().bold()
            ),
            Verdict::IPnetDetected => format!(
                "{} {} detected as {}",
                "[*]".bright_green(),
                report.host,
                "IPnet".bright_green().bold()
            ),
            Verdict::NotIPnet => format!(
                "{} {} detected as {}",
                "[*]".bright_yellow(),
                report.host,
                "NOT IPnet".bright_yellow()
            ),
            Verdict::Inconclusive => format!(
                "{} {} fingerprint {}",
                "[!]".bright_yellow(),
                report.host,
                "inconclusive".bright_yellow()
            ),
        };
        output.push_str(&verdict_line);
        output.push('\n');

        if let Some(vuln) = &report.vulnerability {
            let vuln_line = match vuln {
                VulnerabilityVerdict::Vulnerable => format!(
                    "{} {} affected by {}",
                    "[*]".bright_red(),
                    report.host,
                    "CVE-2019-12258".bright_red().bold()
                ),
                VulnerabilityVerdict::Patched => format!(
                    "{} {} not affected by CVE-2019-12258",
                    "[*]".bright_green(),
                    report.host
                ),
                VulnerabilityVerdict::Inconclusive => format!(
                    "{} CVE-2019-12258 check inconclusive for {}",
                    "[!]".bright_yellow(),
                    report.host
                ),
            };
            output.push_str(&vuln_line);
            output.push('\n');
        }

        output
    }
}

fn format_contribution(contribution: i32) -> String {
    if contribution > 0 {
        format!("+{}", contribution)
    } else {
        contribution.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::classifier::ClassifiedScore;
    use crate::fingerprint::report::FingerprintReport;
    use chrono::Utc;

    fn sample_report() -> DetectionReport {
        DetectionReport {
            host: "192.0.2.10".to_string(),
            port: 502,
            timestamp: Utc::now(),
            fingerprint: FingerprintReport {
                host: "192.0.2.10".to_string(),
                port: 502,
                scores: vec![ClassifiedScore {
                    probe: "tcp-malformed-options".to_string(),
                    contribution: 100,
                    rationale: "response field matches the IPnet signature".to_string(),
                    vxworks_signal: true,
                }],
                total_score: 100,
                verdict: Verdict::VxWorksIPnetDetected,
            },
            vulnerability: Some(VulnerabilityVerdict::Patched),
        }
    }

    #[test]
    fn test_format_parses() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_text_output_mentions_verdict_and_scores() {
        colored::control::set_override(false);
        let manager = OutputManager::new(OutputConfig {
            colored: false,
            ..Default::default()
        });
        let text = manager.format_text(&sample_report());
        assert!(text.contains("tcp-malformed-options"));
        assert!(text.contains("+100"));
        assert!(text.contains("VxWorks (IPnet)"));
        assert!(text.contains("not affected by CVE-2019-12258"));
    }

    #[test]
    fn test_json_round_trip() {
        let report = sample_report();
        let json = serde_json::to_string(&report).unwrap();
        let parsed: DetectionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
