//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use workbridge::api::patch::FieldSet;
use workbridge::api::types::fields;
use workbridge::config::CONFIG_PATH_ENV;
use workbridge::service::WorkItemQuery;

#[derive(Parser, Debug)]
#[command(name = "workbridge")]
#[command(author, version, about = "Azure DevOps work items from the command line")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to <config dir>/workbridge/config.toml)
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Connection name (defaults to settings.default_connection)
    #[arg(long, short = 'c', global = true)]
    pub connection: Option<String>,

    /// Re-read the configuration instead of using cached lookups
    #[arg(long, global = true)]
    pub refresh: bool,

    /// Also log to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured connections
    Configs,

    /// List declared work item types
    Types,

    /// List the states of a work item type
    States {
        /// Work item type name
        work_item_type: String,

        /// Only states a new item may start in
        #[arg(long)]
        creation: bool,
    },

    /// List priority levels
    Priorities,

    /// List recently changed work items
    #[command(alias = "ls")]
    List {
        /// Filter by work item type
        #[arg(long = "type", short = 't')]
        work_item_type: Option<String>,

        /// Filter by state
        #[arg(long, short = 's')]
        state: Option<String>,

        /// Maximum number of items to query (1-200)
        #[arg(long, short = 'n')]
        max: Option<u32>,
    },

    /// Create a work item
    Create {
        /// Work item type name
        work_item_type: String,

        /// Title of the work item
        #[arg(long)]
        title: String,

        /// Initial state
        #[arg(long, short = 's')]
        state: Option<String>,

        /// Additional fields (Field.Name=value, can be specified multiple times)
        #[arg(long = "field", short = 'f')]
        fields: Vec<String>,
    },

    /// Update fields of a work item
    Update {
        /// Work item id
        id: i64,

        /// Field assignments (Field.Name=value)
        #[arg(long = "field", short = 'f', required = true)]
        fields: Vec<String>,
    },

    /// Delete a work item
    Delete {
        /// Work item id
        id: i64,

        /// Reason recorded in the audit log
        #[arg(long, short = 'r')]
        reason: Option<String>,
    },

    /// Manage managed credentials in the OS keyring
    #[command(subcommand)]
    Credential(CredentialCommands),
}

#[derive(Subcommand, Debug)]
pub enum CredentialCommands {
    /// Store an access token for a channel
    Set {
        /// Keyring channel name
        channel: String,

        /// The access token
        #[arg(long, env = "WORKBRIDGE_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Show whether a channel has a stored token
    Status {
        /// Keyring channel name
        channel: String,
    },

    /// Remove the stored token for a channel
    Delete {
        /// Keyring channel name
        channel: String,
    },
}

/// Build a field set from `Field.Name=value` assignments.
pub fn parse_fields(assignments: &[String]) -> workbridge::Result<FieldSet> {
    let mut set = FieldSet::new();
    for assignment in assignments {
        let (name, value) = FieldSet::parse_assignment(assignment)?;
        set.insert(name, value);
    }
    Ok(set)
}

/// Fields for `create`: title first, then state, then the extra assignments.
pub fn creation_fields(
    title: &str,
    state: Option<&str>,
    assignments: &[String],
) -> workbridge::Result<FieldSet> {
    let mut set = FieldSet::new().with(fields::TITLE, title);
    if let Some(state) = state {
        set.insert(fields::STATE, state);
    }
    for (name, value) in parse_fields(assignments)?.iter() {
        set.insert(name, value.clone());
    }
    Ok(set)
}

/// The query for `list`.
pub fn list_query(
    work_item_type: Option<String>,
    state: Option<String>,
    max: Option<u32>,
) -> WorkItemQuery {
    WorkItemQuery {
        work_item_type,
        state,
        max_results: max,
    }
}
