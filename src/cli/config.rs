// CLI configuration commands: show, set

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{ConfigSetArgs, Context};
use crate::errors::ValidationError;
use crate::models::{
    ConfigDraft, ConfigEdit, ContractType, PublicationTimeframe, RemoteType, SearchConfiguration,
};
use crate::sync::{ConfigBackend, ConfigSynchronizer};

/// Translate `config set` flags into draft edits. Repeated list flags
/// replace the whole list; selection flags replace the whole selection.
pub fn build_edits(args: &ConfigSetArgs) -> Result<Vec<ConfigEdit>, ValidationError> {
    let mut edits = Vec::new();

    if !args.terms.is_empty() {
        edits.push(ConfigEdit::ReplaceSearchTerms(args.terms.clone()));
    }
    if !args.excludes.is_empty() {
        edits.push(ConfigEdit::ReplaceExcludedKeywords(args.excludes.clone()));
    }
    if !args.contracts.is_empty() {
        let selected = args
            .contracts
            .iter()
            .map(|c| c.parse::<ContractType>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        edits.extend(ContractType::ALL.into_iter().map(|contract_type| {
            ConfigEdit::SetContractType {
                contract_type,
                selected: selected.contains(&contract_type),
            }
        }));
    }
    if !args.remotes.is_empty() {
        let selected = args
            .remotes
            .iter()
            .map(|r| r.parse::<RemoteType>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        edits.extend(
            RemoteType::ALL
                .into_iter()
                .map(|remote_type| ConfigEdit::SetRemoteType {
                    remote_type,
                    selected: selected.contains(&remote_type),
                }),
        );
    }
    if let Some(timeframe) = &args.timeframe {
        edits.push(ConfigEdit::SetPublicationTimeframe(
            timeframe.parse::<PublicationTimeframe>()?,
        ));
    }
    if let Some(message) = &args.message {
        edits.push(ConfigEdit::SetApplicationMessage(message.clone()));
    }
    if let Some(max) = args.max {
        edits.push(ConfigEdit::SetMaxApplications(max));
    }
    if let Some(delay) = args.delay {
        edits.push(ConfigEdit::SetDelaySecs(delay));
    }

    Ok(edits)
}

fn join_or_dash<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined: Vec<String> = values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .filter(|v| !v.trim().is_empty())
        .collect();
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined.join(", ")
    }
}

fn print_draft(draft: &ConfigDraft) {
    println!("{:<22}{}", "Search terms:", join_or_dash(&draft.search_terms));
    println!(
        "{:<22}{}",
        "Contract types:",
        join_or_dash(draft.contract_types.iter().map(|c| c.as_str()))
    );
    println!(
        "{:<22}{}",
        "Remote types:",
        join_or_dash(draft.remote_types.iter().map(|r| r.as_str()))
    );
    println!(
        "{:<22}{}",
        "Published within:",
        draft.publication_timeframe.as_str()
    );
    println!(
        "{:<22}{}",
        "Excluded keywords:",
        join_or_dash(&draft.excluded_keywords)
    );
    println!(
        "{:<22}{}",
        "Max applications:", draft.max_applications_per_session
    );
    println!(
        "{:<22}{}s",
        "Delay:", draft.delay_between_applications_secs
    );
    println!("Application message:");
    if draft.application_message.trim().is_empty() {
        println!("  -");
    } else {
        for line in draft.application_message.lines() {
            println!("  {}", line);
        }
    }
}

/// autoapply config show
pub async fn cmd_show(ctx: &Context, json: bool) -> anyhow::Result<()> {
    ctx.ensure_authenticated().await?;
    let config: Option<SearchConfiguration> = ctx.client.fetch_config(None).await?;

    if json {
        match &config {
            Some(config) => println!("{}", serde_json::to_string_pretty(config)?),
            None => println!("null"),
        }
        return Ok(());
    }

    match config {
        Some(config) => print_draft(&ConfigDraft::from_config(&config)),
        None => {
            println!("No saved configuration. Defaults:");
            print_draft(&ConfigDraft::default());
        }
    }
    Ok(())
}

/// autoapply config set
pub async fn cmd_set(ctx: &Context, args: &ConfigSetArgs) -> anyhow::Result<()> {
    let edits = build_edits(args)?;
    if edits.is_empty() {
        anyhow::bail!("Nothing to change (see: autoapply config set --help)");
    }
    let Some(credentials) = ctx.credentials.clone() else {
        anyhow::bail!("Credentials required: pass --email and --password");
    };

    let backend: Arc<dyn ConfigBackend> = ctx.client.clone();
    let sync = ConfigSynchronizer::spawn(backend, &ctx.config);

    sync.set_credentials(Some(credentials)).await?;
    let loaded = sync.wait_until_settled().await?;
    tracing::debug!(
        "Loaded configuration (previously saved: {})",
        loaded.last_saved.is_some()
    );

    for edit in edits {
        sync.edit(edit).await?;
    }
    let snapshot = sync.flush().await?;

    if let Some(notice) = snapshot.notice {
        anyhow::bail!("{}", notice);
    }
    if !snapshot.field_errors.is_empty() {
        let errors: Vec<String> = snapshot
            .field_errors
            .iter()
            .map(|e| e.to_string())
            .collect();
        anyhow::bail!("Configuration not saved: {}", errors.join("; "));
    }

    println!("Configuration saved!");
    print_draft(&snapshot.draft);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_edits_empty() {
        assert!(build_edits(&ConfigSetArgs::default()).unwrap().is_empty());
    }

    #[test]
    fn test_build_edits_replaces_lists() {
        let args = ConfigSetArgs {
            terms: vec!["rust".into(), "go".into()],
            excludes: vec!["php".into()],
            ..ConfigSetArgs::default()
        };
        assert_eq!(
            build_edits(&args).unwrap(),
            vec![
                ConfigEdit::ReplaceSearchTerms(vec!["rust".into(), "go".into()]),
                ConfigEdit::ReplaceExcludedKeywords(vec!["php".into()]),
            ]
        );
    }

    #[test]
    fn test_build_edits_contract_selection_replaces_all() {
        let args = ConfigSetArgs {
            contracts: vec!["contractor".into(), "internship".into()],
            ..ConfigSetArgs::default()
        };
        let edits = build_edits(&args).unwrap();
        assert_eq!(edits.len(), ContractType::ALL.len());

        let mut draft = ConfigDraft::default();
        draft.contract_types.insert(ContractType::Permanent);
        for edit in edits {
            draft.apply(edit).unwrap();
        }
        let selected: Vec<ContractType> = draft.contract_types.into_iter().collect();
        assert_eq!(
            selected,
            vec![ContractType::Contractor, ContractType::Internship]
        );
    }

    #[test]
    fn test_build_edits_rejects_unknown_values() {
        let args = ConfigSetArgs {
            remotes: vec!["hybrid".into()],
            ..ConfigSetArgs::default()
        };
        assert_eq!(
            build_edits(&args),
            Err(ValidationError::UnknownOption {
                field: "remote type",
                value: "hybrid".into()
            })
        );

        let args = ConfigSetArgs {
            timeframe: Some("yesterday".into()),
            ..ConfigSetArgs::default()
        };
        assert!(build_edits(&args).is_err());
    }

    #[test]
    fn test_build_edits_scalars() {
        let args = ConfigSetArgs {
            timeframe: Some("less_than_24_hours".into()),
            message: Some("Hi".into()),
            max: Some(50),
            delay: Some(4),
            ..ConfigSetArgs::default()
        };
        assert_eq!(
            build_edits(&args).unwrap(),
            vec![
                ConfigEdit::SetPublicationTimeframe(PublicationTimeframe::LessThan24Hours),
                ConfigEdit::SetApplicationMessage("Hi".into()),
                ConfigEdit::SetMaxApplications(50),
                ConfigEdit::SetDelaySecs(4),
            ]
        );
    }

    #[test]
    fn test_join_or_dash() {
        assert_eq!(join_or_dash(Vec::<String>::new()), "-");
        assert_eq!(join_or_dash(["", "a", "b"]), "a, b");
    }
}
