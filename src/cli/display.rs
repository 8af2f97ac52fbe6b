//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::Answer;
use crate::client::catalog::CatalogModel;
use crate::model::DeploymentRecord;
use crate::resolver::{DeploymentOrigin, ResolvedDeployment};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    push_row(&mut output, headers.iter().map(|h| h.to_uppercase()), &widths);
    for row in rows {
        push_row(&mut output, row.into_iter(), &widths);
    }
    output
}

fn push_row(output: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let cells: Vec<String> = cells.collect();
    let last = cells.len().saturating_sub(1);
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        match widths.get(i) {
            // No trailing padding on the last column
            Some(&width) if i < last => output.push_str(&format!("{:width$}", cell, width = width)),
            _ => output.push_str(cell),
        }
    }
    output.push('\n');
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

// ============================================================================
// Deployments
// ============================================================================

/// Format deployment list for display
pub fn format_deployment_list(deployments: &[DeploymentRecord]) -> String {
    let headers = &["ID", "NAME", "MODEL", "STATUS", "ENDPOINT"];
    let rows: Vec<Vec<String>> = deployments
        .iter()
        .map(|d| {
            vec![
                d.id.clone(),
                or_dash(d.model_name.as_deref()),
                d.model_path.clone(),
                d.status.to_string(),
                or_dash(d.internal_endpoint.as_deref()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format a resolved deployment for display
pub fn format_resolved(resolved: &ResolvedDeployment) -> String {
    let mut output = String::new();

    let heading = match resolved.origin {
        DeploymentOrigin::Existing => "Using existing deployment",
        DeploymentOrigin::Provisioned => "Deployed new instance",
    };
    output.push_str(&format!("{}: {}\n", heading, resolved.deployment_id));
    output.push_str(&format!("  Model:       {}\n", resolved.verified_model_id));
    output.push_str(&format!("  Status:      {}\n", resolved.status));
    output.push_str(&format!("  Endpoint:    {}\n", resolved.external_endpoint));
    output.push_str(&format!("  Docs:        {}\n", resolved.docs_url()));
    if resolved.internal_endpoint != resolved.external_endpoint {
        output.push_str(&format!("  Internal:    {}\n", resolved.internal_endpoint));
    }
    if let Some(ref tunnel) = resolved.tunnel {
        output.push_str(&format!(
            "  Tunnel:      localhost:{} -> {}:{}\n",
            tunnel.local_port, tunnel.remote_service_name, tunnel.remote_port
        ));
    }
    output.push_str(&format!("  Deployed at: {}\n", resolved.deployed_at));

    output
}

// ============================================================================
// Catalog
// ============================================================================

/// Format catalog models for display
pub fn format_catalog(models: &[CatalogModel]) -> String {
    let headers = &["MODEL", "PROVIDER"];
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|m| vec![m.model_ref().canonical(), or_dash(m.provider.as_deref())])
        .collect();

    format_table(headers, rows)
}

// ============================================================================
// Inference
// ============================================================================

/// Format an answered question for display
pub fn format_answer(answer: &Answer) -> String {
    let mut output = String::new();
    output.push_str(&format!("Q: {}\n", answer.question));
    output.push_str(&format!("A: {}\n", answer.text.trim()));

    let mut stats = format!("{:.2}s", answer.latency.as_secs_f64());
    if let Some(tokens) = answer.total_tokens {
        stats.push_str(&format!(", {} tokens", tokens));
    }
    output.push_str(&format!("({}, model {})\n", stats, answer.model));
    output
}
