use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IndexAction {
    /// Load the cached index, building and caching it if needed
    Build {
        /// Ignore the cache and rebuild from the reference database
        #[clap(short, long, default_value = "false")]
        force: bool,
    },
    /// Delete the cached index
    Clear {},
    /// Print index statistics
    Info {},
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find the conditions closest to the given symptoms
    Diagnose {
        /// Symptoms, as separate arguments or comma-separated
        #[clap(required = true, allow_hyphen_values = true)]
        symptoms: Vec<String>,

        /// Number of matches to return (defaults to `top_k` from config.yaml)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Manage the cached semantic index
    Index {
        #[clap(subcommand)]
        action: IndexAction,
    },
    /// List conditions in the reference database
    Conditions {},
}

/// Split comma-separated arguments into individual symptoms.
///
/// `["head pain, vomiting", "joint ache"]` gives three symptoms. Blank pieces
/// are dropped.
pub fn parse_symptoms(args: Vec<String>) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symptoms() {
        let parsed = parse_symptoms(vec![
            "head pain, vomiting".to_string(),
            "joint ache".to_string(),
            " ,".to_string(),
        ]);
        assert_eq!(parsed, vec!["head pain", "vomiting", "joint ache"]);
    }

    #[test]
    fn test_args_parse_diagnose() {
        let args = Args::parse_from(["symptom-match", "diagnose", "-k", "3", "fever", "cough"]);
        match args.command {
            Command::Diagnose { symptoms, top_k } => {
                assert_eq!(symptoms, vec!["fever", "cough"]);
                assert_eq!(top_k, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_index_build() {
        let args = Args::parse_from(["symptom-match", "index", "build", "--force"]);
        assert!(matches!(
            args.command,
            Command::Index {
                action: IndexAction::Build { force: true }
            }
        ));
    }
}
