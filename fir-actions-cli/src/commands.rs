//! CLI subcommand handlers.

use crate::output::{self, ActionDetail, BlockRow};
use crate::{
    ActionAction, ArtifactsAction, BlockAction, Cli, Commands, ConfigAction, IncidentAction,
};
use anyhow::{Context, anyhow};
use fir_actions_core::artifacts;
use fir_actions_core::config::{self, FirConfig};
use fir_actions_core::{
    ActionFilter, ActionTransitionRequest, ActionType, BlockFilter, BlockId, BlockRequest,
    BlockRequestOutcome, BusinessLineId, Engine, FirError, Fixture, IncidentId, NewAction,
    NewIncident, Status, Store, TracingHook,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const USER_ENV: &str = "FIR_ACTIONS_USER";

/// Handle a CLI subcommand.
pub fn handle_command(cli: &Cli, workspace: &Path, config: &FirConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Config { action } => handle_config(action, workspace, config),
        Commands::Artifacts {
            action: ArtifactsAction::Extract { text },
        } => {
            let found = artifacts::extract(text, &config.artifacts.kinds);
            if cli.json {
                return output::print_json(&found);
            }
            let lines = output::extraction_lines(&found);
            if lines.is_empty() {
                println!("No indicators found.");
            }
            for line in lines {
                println!("{line}");
            }
            Ok(())
        }
        command => {
            let session = Session::open(workspace, config, cli.actor.clone())?;
            session.run(command, cli.json)?;
            session.save()
        }
    }
}

fn handle_config(action: &ConfigAction, workspace: &Path, config: &FirConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config::workspace_config_path(workspace);
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let path = config::write_default_config(workspace)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}

/// Attach the error kind to transition failures so scripts can tell a
/// denial from a bad state.
fn fail(err: FirError) -> anyhow::Error {
    match err.transition() {
        Some(transition) => anyhow!("[{}] {}", transition.kind().as_str(), transition),
        None => anyhow::Error::new(err),
    }
}

/// One engine over the state file, plus the acting user.
struct Session {
    engine: Engine,
    state_path: Option<PathBuf>,
    autosave: bool,
    actor: Option<String>,
}

impl Session {
    fn open(workspace: &Path, config: &FirConfig, actor: Option<String>) -> anyhow::Result<Self> {
        let state_path = config.state_path(workspace);
        let engine = match &state_path {
            Some(path) => Engine::open(path, config)
                .map_err(fail)
                .with_context(|| format!("Failed to open state at {}", path.display()))?,
            None => {
                warn!("No state path configured; changes will not be kept");
                Engine::from_config(Store::new(), config)
            }
        };
        Ok(Self {
            engine: engine.with_hook(Arc::new(TracingHook)),
            state_path,
            autosave: config.store.autosave,
            actor: actor.or_else(|| std::env::var(USER_ENV).ok()),
        })
    }

    fn actor(&self) -> anyhow::Result<&str> {
        self.actor
            .as_deref()
            .filter(|actor| !actor.trim().is_empty())
            .ok_or_else(|| anyhow!("No acting user: pass --as <user> or set {USER_ENV}"))
    }

    fn save(&self) -> anyhow::Result<()> {
        match &self.state_path {
            Some(path) if self.autosave => {
                self.engine.save(path).map_err(fail)?;
                info!(path = %path.display(), "Saved state");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn store(&self) -> anyhow::Result<Store> {
        self.engine.snapshot().map_err(fail)
    }

    fn business_line(&self, store: &Store, name: &str) -> anyhow::Result<BusinessLineId> {
        store
            .business_lines
            .find_by_name(name)
            .map(|bl| bl.id)
            .ok_or_else(|| anyhow!("[not_found] business line not found: {name}"))
    }

    fn run(&self, command: &Commands, json: bool) -> anyhow::Result<()> {
        match command {
            Commands::Seed { fixture } => self.seed(fixture),
            Commands::Incident { action } => self.incident(action, json),
            Commands::Action { action } => self.action(action, json),
            Commands::Block { action } => self.block(action, json),
            Commands::Artifacts {
                action: ArtifactsAction::Show { block },
            } => {
                let artifacts = self
                    .engine
                    .block_artifacts(BlockId(*block), self.actor()?)
                    .map_err(fail)?;
                if json {
                    return output::print_json(&artifacts);
                }
                for artifact in &artifacts {
                    println!("{}", output::artifact_line(artifact));
                }
                Ok(())
            }
            Commands::Config { .. } | Commands::Artifacts { .. } => Ok(()),
        }
    }

    fn seed(&self, fixture: &Path) -> anyhow::Result<()> {
        let fixture = Fixture::from_file(fixture).map_err(fail)?;
        let report = self.engine.load_fixture(&fixture).map_err(fail)?;
        println!(
            "Loaded {} business lines, {} users, {} block types, {} locations, {} templates, {} action lists",
            report.business_lines,
            report.users,
            report.block_types,
            report.locations,
            report.templates,
            report.action_lists
        );
        let store = self.store()?;
        for template in store.templates.templates() {
            println!("  {}", template.describe(&store.business_lines));
        }
        Ok(())
    }

    fn incident(&self, action: &IncidentAction, json: bool) -> anyhow::Result<()> {
        let IncidentAction::Create {
            subject,
            business_lines,
            category,
            detection,
            plan,
            description,
        } = action;
        let store = self.store()?;
        let concerned = business_lines
            .iter()
            .map(|name| self.business_line(&store, name))
            .collect::<anyhow::Result<BTreeSet<_>>>()?;

        let created = self
            .engine
            .create_incident(
                NewIncident {
                    subject: subject.clone(),
                    description: description.clone(),
                    category: category.clone(),
                    detection: detection.clone(),
                    plan: plan.clone(),
                    concerned_business_lines: concerned,
                },
                self.actor()?,
            )
            .map_err(fail)?;

        if json {
            return output::print_json(&created);
        }
        println!(
            "Created incident {} with {} action(s)",
            created.incident,
            created.actions.len()
        );
        let store = self.store()?;
        for id in &created.actions {
            if let Some(action) = store.actions.get(id) {
                println!("  {}", output::action_line(action, &store.business_lines));
            }
        }
        Ok(())
    }

    fn action(&self, action: &ActionAction, json: bool) -> anyhow::Result<()> {
        match action {
            ActionAction::Create {
                subject,
                business_line,
                incident,
                action_type,
                description,
            } => {
                let store = self.store()?;
                let action_type: ActionType = action_type
                    .parse()
                    .map_err(|e: String| anyhow!("[validation] {e}"))?;
                let id = self
                    .engine
                    .create_action(
                        NewAction {
                            action_type,
                            subject: subject.clone(),
                            description: description.clone(),
                            business_line: Some(self.business_line(&store, business_line)?),
                            incident: incident.map(IncidentId),
                        },
                        self.actor()?,
                    )
                    .map_err(fail)?;
                println!("Created action {id}");
                Ok(())
            }
            ActionAction::Transition {
                id,
                transition,
                comment,
                business_line,
                subject,
                description,
            } => {
                let store = self.store()?;
                let request = ActionTransitionRequest {
                    comment: comment.clone(),
                    business_line: business_line
                        .as_deref()
                        .map(|name| self.business_line(&store, name))
                        .transpose()?,
                    subject: subject.clone(),
                    description: description.clone(),
                };
                let outcome = self
                    .engine
                    .transition_action_named((*id).into(), transition, &request, self.actor()?)
                    .map_err(fail)?;
                if json {
                    return output::print_json(&outcome);
                }
                println!("{}: {} -> {}", outcome.action, outcome.from, outcome.to);
                Ok(())
            }
            ActionAction::List { incident, status } => {
                let filter = ActionFilter {
                    incident: incident.map(IncidentId),
                    status: parse_status(status.as_deref())?,
                    ..ActionFilter::default()
                };
                let actions = self.engine.list_actions(&filter, self.actor()?).map_err(fail)?;
                if json {
                    return output::print_json(&actions);
                }
                let store = self.store()?;
                for action in &actions {
                    println!("{}", output::action_line(action, &store.business_lines));
                }
                Ok(())
            }
            ActionAction::Show { id } => {
                let id = (*id).into();
                let actor = self.actor()?;
                let action = self.engine.action(id, actor).map_err(fail)?;
                let comments = self.engine.action_comments(id, actor).map_err(fail)?;
                let available = self
                    .engine
                    .available_action_transitions(id, actor)
                    .map_err(fail)?
                    .iter()
                    .map(|edge| edge.verbose)
                    .collect();
                let detail = ActionDetail {
                    action: &action,
                    comments: &comments,
                    available,
                };
                if json {
                    return output::print_json(&detail);
                }
                let store = self.store()?;
                for line in output::action_header(&action, &store.business_lines) {
                    println!("{line}");
                }
                if !detail.comments.is_empty() {
                    println!();
                    println!("History:");
                    for comment in detail.comments {
                        println!("{}", output::comment_line(comment));
                    }
                }
                if !detail.available.is_empty() {
                    println!();
                    println!("Available: {}", detail.available.join(", "));
                }
                Ok(())
            }
        }
    }

    fn block(&self, action: &BlockAction, json: bool) -> anyhow::Result<()> {
        match action {
            BlockAction::Add {
                incident,
                location,
                block_type,
                what,
                comment,
            } => {
                let store = self.store()?;
                let location = store
                    .find_location(location)
                    .ok_or_else(|| anyhow!("[not_found] block location not found: {location}"))?;
                let how = store
                    .find_block_type(block_type)
                    .ok_or_else(|| anyhow!("[not_found] block type not found: {block_type}"))?;
                let outcomes = self
                    .engine
                    .request_blocks(
                        &BlockRequest {
                            incident: IncidentId(*incident),
                            location: location.id,
                            block_type: how.id,
                            what: what.join("\n"),
                            comment: comment.clone(),
                        },
                        self.actor()?,
                    )
                    .map_err(fail)?;
                if json {
                    return output::print_json(&outcomes);
                }
                for outcome in &outcomes {
                    let verb = match outcome {
                        BlockRequestOutcome::Created(_) => "Created",
                        BlockRequestOutcome::Reused(_) => "Reused",
                    };
                    let description = self
                        .engine
                        .describe_block(outcome.block(), self.actor()?)
                        .map_err(fail)?;
                    println!("{verb} {}: {description}", outcome.block());
                }
                Ok(())
            }
            BlockAction::Transition {
                id,
                transition,
                comment,
            } => {
                let report = self
                    .engine
                    .transition_block_named(
                        (*id).into(),
                        transition,
                        comment.as_deref(),
                        self.actor()?,
                    )
                    .map_err(fail)?;
                if json {
                    return output::print_json(&report);
                }
                println!(
                    "{}: {} -> {} ({} action(s) created, {} updated)",
                    report.block,
                    report.from,
                    report.to,
                    report.created.len(),
                    report.updated.len()
                );
                Ok(())
            }
            BlockAction::List {
                incident,
                status,
                location,
                block_type,
            } => {
                let store = self.store()?;
                let location = location
                    .as_deref()
                    .map(|name| {
                        store
                            .find_location(name)
                            .map(|location| location.id)
                            .ok_or_else(|| anyhow!("[not_found] block location not found: {name}"))
                    })
                    .transpose()?;
                let block_type = block_type
                    .as_deref()
                    .map(|name| {
                        store
                            .find_block_type(name)
                            .map(|how| how.id)
                            .ok_or_else(|| anyhow!("[not_found] block type not found: {name}"))
                    })
                    .transpose()?;
                let filter = BlockFilter {
                    incident: incident.map(IncidentId),
                    status: parse_status(status.as_deref())?,
                    location,
                    block_type,
                    ..BlockFilter::default()
                };
                let blocks = self.engine.list_blocks(&filter, self.actor()?).map_err(fail)?;
                let rows: Vec<BlockRow<'_>> = blocks
                    .iter()
                    .map(|block| BlockRow {
                        block,
                        description: store.describe_block(block),
                    })
                    .collect();
                if json {
                    return output::print_json(&rows);
                }
                for row in &rows {
                    println!("{}", output::block_line(row));
                }
                Ok(())
            }
        }
    }
}

fn parse_status(status: Option<&str>) -> anyhow::Result<Option<Status>> {
    status
        .map(|s| s.parse::<Status>().map_err(|e| anyhow!("[validation] {e}")))
        .transpose()
}
