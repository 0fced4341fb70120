//! Implementation of the `esearch ask`, `classify`, `routes` and `check`
//! commands.
//!
//! Output is human-readable by default; `--json` prints the envelope (or
//! the failure) as pretty JSON on stdout. A `Failed` pipeline result is
//! returned as an error so the process exits non-zero.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::PipelineFailure;
use crate::http::truncate;
use crate::models::{AnswerEnvelope, QueryClassification, Route};
use crate::orchestrator::Orchestrator;

/// Characters of snippet shown per source in human-readable output.
const SNIPPET_PREVIEW: usize = 160;

/// One entry of the query type catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub route: Route,
    pub name: &'static str,
    pub description: &'static str,
    pub examples: &'static [&'static str],
    pub supported: bool,
}

/// The query types users can ask, with example questions.
pub fn route_catalogue() -> Vec<RouteInfo> {
    vec![
        RouteInfo {
            route: Route::BasicSearch,
            name: "Basic Keyword Search with Filters",
            description: "Structured queries with specific criteria like date ranges, programs or industries",
            examples: &[
                "Find OFAC violations related to Iran sanctions from 2020 to 2023",
                "Show me voluntary disclosures in the financial services industry",
                "Search for cases involving penalties over $1 million",
            ],
            supported: true,
        },
        RouteInfo {
            route: Route::AdvancedSearch,
            name: "Advanced Document Search",
            description: "Complex questions that need semantic understanding and analysis of document content",
            examples: &[
                "Can Iranian origin banknotes be imported into the U.S.?",
                "What are the compliance requirements for financial institutions?",
                "How does OFAC determine penalty amounts?",
            ],
            supported: true,
        },
        RouteInfo {
            route: Route::Statistical,
            name: "Statistical Queries",
            description: "Aggregate questions and statistics (coming soon)",
            examples: &[
                "How many violations were there in 2023?",
                "What's the average penalty amount for financial institutions?",
                "Which industry had the most violations?",
            ],
            supported: false,
        },
    ]
}

pub async fn run_ask(config: &Config, question: &str, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;

    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; never cancel.
            std::future::pending::<()>().await;
        }
    };

    match orchestrator.submit_question_until(question, cancel).await {
        Ok(envelope) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            } else {
                print_envelope(&envelope);
            }
            Ok(())
        }
        Err(failure) => report_failure(failure, json),
    }
}

pub async fn run_classify(config: &Config, question: &str, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;

    match orchestrator.classify_only(question).await {
        Ok(classification) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&classification)?);
            } else {
                print_classification(&classification)?;
            }
            Ok(())
        }
        Err(failure) => report_failure(failure, json),
    }
}

pub fn run_routes(json: bool) -> Result<()> {
    let catalogue = route_catalogue();
    if json {
        println!("{}", serde_json::to_string_pretty(&catalogue)?);
        return Ok(());
    }

    for info in &catalogue {
        let status = if info.supported { "" } else { " [not yet supported]" };
        println!("{} ({}){}", info.name, info.route, status);
        println!("  {}", info.description);
        for example in info.examples {
            println!("  - {}", example);
        }
        println!();
    }
    println!(
        "Questions are routed automatically. Vague questions get a clarifying \
         follow-up instead of a search."
    );
    Ok(())
}

/// Validate the configuration and construct every backend.
pub fn run_check(config: &Config) -> Result<()> {
    Orchestrator::from_config(config)?;

    println!("{:<12} {}", "COMPONENT", "SETTING");
    println!(
        "{:<12} {} (classifier: {}, generation: {})",
        "llm", config.llm.provider, config.llm.classifier_model, config.llm.generation_model
    );
    println!(
        "{:<12} {}{}",
        "embedding",
        config.embedding.provider,
        config
            .embedding
            .model
            .as_deref()
            .map(|m| format!(" ({})", m))
            .unwrap_or_default()
    );
    let search_target = match config.search.backend.as_str() {
        "azure" => format!(
            "{} / {}",
            config.search.endpoint.as_deref().unwrap_or("?"),
            config.search.index.as_deref().unwrap_or("?")
        ),
        _ => config
            .search
            .documents_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(empty)".to_string()),
    };
    println!("{:<12} {} ({})", "search", config.search.backend, search_target);
    println!(
        "{:<12} {}",
        "tracing",
        if config.tracing.enabled { "enabled" } else { "disabled" }
    );
    println!("Configuration OK.");
    Ok(())
}

fn report_failure(failure: PipelineFailure, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&failure)?);
    }
    Err(failure.into())
}

fn print_envelope(envelope: &AnswerEnvelope) {
    let confidence = envelope
        .classification
        .confidence
        .map(|c| format!(" (confidence {:.2})", c))
        .unwrap_or_default();
    println!("Route: {}{}", envelope.route, confidence);
    if let Some(filter) = &envelope.applied_filter {
        println!("Query: {}", filter);
    }
    println!();
    println!("{}", envelope.answer_text.trim_end());

    if !envelope.supporting_results.is_empty() {
        println!();
        println!("Sources:");
        for (i, r) in envelope.supporting_results.iter().enumerate() {
            println!(
                "{:>3}. [{:.3}] {} ({})",
                i + 1,
                r.score,
                r.title().unwrap_or("(untitled)"),
                r.document_id
            );
            if !r.snippet.is_empty() {
                println!("       {}", truncate(&r.snippet.replace('\n', " "), SNIPPET_PREVIEW));
            }
        }
    }

    if !envelope.diagnostics.is_empty() {
        println!();
        for d in &envelope.diagnostics {
            println!("! {}: {}", d.kind.as_str(), d.message);
        }
    }
}

fn print_classification(c: &QueryClassification) -> Result<()> {
    println!("Route:      {}", c.route);
    if let Some(confidence) = c.confidence {
        println!("Confidence: {:.2}", confidence);
    }
    if !c.rationale.is_empty() {
        println!("Reasoning:  {}", c.rationale);
    }
    if let Some(q) = &c.clarification_question {
        println!("Follow-up:  {}", q);
    }
    if !c.filters.is_empty() {
        println!("Filters:    {}", serde_json::to_string(&c.filters)?);
    }
    Ok(())
}
