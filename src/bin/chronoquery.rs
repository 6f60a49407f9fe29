//! chronoquery CLI: ask one question, rebuild the entity index, or check the
//! configuration and warehouse sources.

use anyhow::Result;
use chronoquery::embedding::CharGramEmbedder;
use chronoquery::llm::OpenAiModel;
use chronoquery::session::{InMemoryConversationMemory, TurnContext};
use chronoquery::warehouse::HttpWarehouse;
use chronoquery::{Assistant, AssistantConfig, EntityCategory};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chronoquery", about = "Natural-language SQL assistant for the time management warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question and print the generated SQL and result rows
    Ask {
        question: String,
        /// Session id for follow-up context
        #[arg(long)]
        session: Option<String>,
        /// Print the generated SQL without executing it
        #[arg(long)]
        dry: bool,
    },
    /// Rebuild the entity index from warehouse data
    Reindex {
        /// Single category (person, place, activity, department); all when omitted
        #[arg(long)]
        category: Option<String>,
        /// Reset existing records before rebuilding
        #[arg(long)]
        reset: bool,
    },
    /// Validate configuration and warehouse sources
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AssistantConfig::from_env();

    let model = Arc::new(OpenAiModel::new(
        config.model_api_key.clone(),
        config.model_base_url.clone(),
        config.model_name.clone(),
    ));
    let warehouse = Arc::new(HttpWarehouse::new(
        config.warehouse_base_url.clone(),
        config.warehouse_user.clone(),
        config.warehouse_catalog.clone(),
        config.warehouse_schema.clone(),
    ));
    let memory = Arc::new(InMemoryConversationMemory::new());
    let memory_view: Arc<dyn chronoquery::ConversationMemory> = memory.clone();

    let assistant = Assistant::new(
        config,
        model,
        Arc::new(CharGramEmbedder::new()),
        warehouse,
        Some(memory_view),
    );

    match cli.command {
        Command::Ask {
            question,
            session,
            dry,
        } => {
            let session_id = session.as_deref();
            let generated = match assistant
                .resolve_and_generate_sql(&question, session_id)
                .await
            {
                Ok(generated) => generated,
                Err(e) => {
                    println!("I don't know how to answer that ({}).", e);
                    return Ok(());
                }
            };

            println!("SQL:\n{}\n", generated.sql);
            if dry {
                return Ok(());
            }

            match assistant.validate_and_execute(&generated.sql, session_id).await {
                Ok(outcome) => {
                    println!("{} row(s)", outcome.row_count);
                    for row in &outcome.rows {
                        println!("{}", serde_json::to_string(row)?);
                    }
                    if let Some(analysis) = &outcome.entity_suggestions {
                        for suggestion in &analysis.suggestions {
                            println!(
                                "Did you mean '{}' instead of '{}'? (confidence {:.2})",
                                suggestion.suggestion, suggestion.original, suggestion.confidence
                            );
                        }
                        for action in &analysis.recommended_actions {
                            println!("- {}", action);
                        }
                    }

                    if let Some(session_id) = session_id {
                        memory.record_turn(
                            TurnContext::builder(session_id)
                                .last_query(question)
                                .last_response(format!("{} row(s)", outcome.row_count))
                                .last_result_sample(
                                    outcome
                                        .rows
                                        .iter()
                                        .take(2)
                                        .map(|r| serde_json::Value::Object(r.clone()))
                                        .collect(),
                                )
                                .resolved_entities(generated.resolution.resolved_entities.clone())
                                .build(),
                        );
                    }
                }
                Err(e) => println!("I don't know how to answer that ({}).", e),
            }
        }
        Command::Reindex { category, reset } => {
            let category = match category.as_deref() {
                Some(name) => Some(
                    EntityCategory::parse(name)
                        .ok_or_else(|| anyhow::anyhow!("unknown category: {}", name))?,
                ),
                None => None,
            };

            let results = assistant.rebuild_entity_index(category, reset).await;
            for (category, stats) in &results {
                println!(
                    "{}: extracted {}, indexed {}, duplicates {}, errors {}",
                    category,
                    stats.total_extracted,
                    stats.successfully_indexed,
                    stats.duplicates_skipped,
                    stats.errors.len()
                );
                for error in &stats.errors {
                    println!("  ! {}", error);
                }
            }
        }
        Command::Check => {
            let report = assistant.check().await;
            println!("valid: {}", report.valid);
            for error in &report.errors {
                println!("error: {}", error);
            }
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            if !report.valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
