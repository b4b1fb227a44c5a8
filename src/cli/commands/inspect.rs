//! Offline inspection of saved responses: classification and extraction.

use std::collections::HashMap;
use std::path::Path;

use console::style;
use serde_json::json;

use crate::cli::icons::{dim_arrow, error, success, warn};
use newsacquire::config::{OriginConfig, Settings};
use newsacquire::extract::ExtractionChain;
use newsacquire::resilience::ChallengeDetector;
use newsacquire::validate::{Decision, QualityGate, ValidationContext};

fn origin_config(settings: &Settings, origin: Option<&str>) -> OriginConfig {
    match origin {
        Some(name) => settings
            .origins
            .get(name)
            .cloned()
            .unwrap_or_else(|| OriginConfig::default_for(name)),
        None => OriginConfig::default_for("local"),
    }
}

fn parse_headers(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    raw.iter()
        .map(|h| {
            let (name, value) = h
                .split_once('=')
                .or_else(|| h.split_once(':'))
                .ok_or_else(|| anyhow::anyhow!("Header must be NAME=VALUE: {}", h))?;
            Ok((name.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect()
}

/// Classify a saved response body.
pub async fn cmd_classify(
    settings: &Settings,
    file: &Path,
    status: u16,
    headers: &[String],
    origin: Option<&str>,
) -> anyhow::Result<()> {
    let body = tokio::fs::read_to_string(file).await?;
    let headers = parse_headers(headers)?;
    let cfg = origin_config(settings, origin);

    let class = ChallengeDetector::new().classify(status, &body, &headers, &cfg.challenge_patterns);
    let icon = if class.is_ok() { success() } else { warn() };
    eprintln!("{} {} ({} bytes, HTTP {})", icon, class.label(), body.len(), status);
    println!("{}", serde_json::to_string_pretty(&class)?);
    Ok(())
}

/// Extract and validate a saved HTML document.
pub async fn cmd_extract(
    settings: &Settings,
    file: &Path,
    url: &str,
    origin: Option<&str>,
) -> anyhow::Result<()> {
    let html = tokio::fs::read_to_string(file).await?;
    let cfg = origin_config(settings, origin);

    let chain = ExtractionChain::new(settings.extraction.clone());
    let result = chain.extract_with_hints(url, &html, &cfg.hints());

    let gate = QualityGate::new(settings.validation.clone());
    let ctx = ValidationContext {
        paper_name: &cfg.paper_name,
        expected_language: cfg.expected_language.as_deref(),
        min_words: cfg.min_words,
        filter: None,
    };
    let verdict = gate.validate(&result, &ctx);

    eprintln!(
        "{} {} (confidence {:.2})",
        dim_arrow(),
        style(result.fallback_level.as_str()).cyan(),
        result.confidence
    );

    let verdict_json = match &verdict.decision {
        Decision::Accept(record) => {
            eprintln!("{} Accepted ({} validation)", success(), verdict.mode);
            json!({ "accepted": true, "mode": verdict.mode.as_str(), "record": record })
        }
        Decision::Reject(reason) => {
            eprintln!("{} Rejected: {} ({} validation)", error(), reason, verdict.mode);
            json!({ "accepted": false, "mode": verdict.mode.as_str(), "rejection": reason })
        }
    };

    let output = json!({ "extraction": result, "verdict": verdict_json });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
