use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml, notes and downloaded models.
    /// Defaults to ~/.local/share/recall
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Whose notes to work with
    #[clap(long, global = true, default_value = "local")]
    pub owner: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct MatchArgs {
    /// Minimum similarity [0.0, 1.0]. Defaults to the configured threshold
    #[clap(short, long)]
    pub threshold: Option<f32>,

    /// Maximum number of notes
    #[clap(short, long)]
    pub limit: Option<usize>,

    /// Weight of recency in the score [0.0, 1.0]
    #[clap(long)]
    pub recency_weight: Option<f32>,

    /// Comma-separated topics used to explain matches
    #[clap(long)]
    pub topics: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Store a new note
    Add {
        /// Note text (plain, markdown or html)
        text: String,

        /// Comma-separated tags
        #[clap(long)]
        tags: Option<String>,
    },

    /// Delete a note
    Remove {
        /// Note id
        id: String,
    },

    /// List stored notes
    List {},

    /// Show notes related to some text
    Related {
        text: String,

        #[command(flatten)]
        match_args: MatchArgs,
    },

    /// Print the context a chat model would receive for some text
    Context {
        text: String,

        /// Text of the page currently being viewed
        #[clap(long)]
        page: Option<String>,

        #[command(flatten)]
        match_args: MatchArgs,
    },

    /// Re-index every note
    Rebuild {},
}
