use std::{fs::File, io::BufReader, sync::Arc};

use clap::Parser;
use reindexer::{
    CancelFlag,
    Collaborators,
    DataDir,
    DocumentId,
    DocumentStore,
    FulltextIndex,
    FulltextJobs,
    Reindexer,
    StorePrincipals,
    classify::FulltextInfo,
    data_dir,
    document::AttributeValue,
    error::{self, Error},
    import::import_documents,
    store::{Role, settings},
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    Cli,
    Command,
    ConfigAction,
    FulltextAction,
    ReindexArgs,
    SearchArgs,
    UserAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("REINDEXER_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let store = Arc::new(DocumentStore::open(&data_dir.repository_db())?);
    let user = data_dir::resolve_user(cli.user);

    match cli.command {
        Command::Reindex(args) => cmd_reindex(&store, &data_dir, user, &args)?,
        Command::Import(args) => {
            let file = File::open(&args.file)?;
            let count = import_documents(&store, BufReader::new(file))?;
            println!("Imported {count} documents from {}", args.file.display());
        }
        Command::Set(args) => {
            store.update_attribute(
                &DocumentId::new(args.id.as_str()),
                &args.attribute,
                AttributeValue::text(args.value),
            )?;
            println!("Set {} on {}", args.attribute, args.id);
        }
        Command::User { action } => match action {
            UserAction::Add { name, admin } => {
                let role = if admin {
                    Role::Administrator
                } else {
                    Role::Member
                };
                store.set_user(&name, role)?;
                println!("Added user '{name}' ({})", role.as_str());
            }
            UserAction::Remove { name } => {
                if !store.remove_user(&name)? {
                    return Err(Error::NotFound { kind: "user", name });
                }
                println!("Removed user '{name}'");
            }
            UserAction::List { json } => user_list(&store, json)?,
        },
        Command::Fulltext { action } => fulltext(&store, action)?,
        Command::Config { action } => match action {
            ConfigAction::Show { json } => config_show(&store, json)?,
            ConfigAction::Set { key, value } => {
                if !settings::EDITABLE.contains(&key.as_str()) {
                    return Err(Error::Config(format!(
                        "unknown setting '{key}' (expected one of: {})",
                        settings::EDITABLE.join(", ")
                    )));
                }
                store.set_setting(&key, &value)?;
                println!("Set {key} = {value}");
            }
        },
        Command::Search(args) => cmd_search(&data_dir, &args)?,
        Command::Status(args) => cmd_status(&store, &data_dir, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_reindex(
    store: &Arc<DocumentStore>,
    data_dir: &DataDir,
    user: Option<String>,
    args: &ReindexArgs,
) -> error::Result<()> {
    let mut config = store.reindex_config()?;
    if let Some(repository) = &args.repository {
        config.repository = repository.clone();
    }

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupted, stopping after the current batch");
        on_interrupt.cancel();
    })?;

    let index = Arc::new(FulltextIndex::open(&data_dir.fulltext_dir()?)?);
    let jobs =
        FulltextJobs::new(Arc::clone(store), index, &config, args.workers)?
            .with_cancel_flag(cancel.clone());
    let principals = StorePrincipals::new(store, user);
    let session = store.session();

    let deps = Collaborators {
        principals: &principals,
        query: store.as_ref(),
        session: &session,
        transactions: &session,
        oracle: store.as_ref(),
        dispatcher: &jobs,
    };
    let status = Reindexer::new(deps, config)
        .with_cancel_flag(cancel)
        .reindex(args.batch_size, args.batch)?;
    println!("{status}");
    Ok(())
}

fn user_list(store: &DocumentStore, json: bool) -> error::Result<()> {
    let users = store.list_users()?;

    if json {
        let entries: Vec<_> = users
            .iter()
            .map(|(name, role)| json!({ "name": name, "role": role }))
            .collect();
        println!("{}", serde_json::Value::Array(entries));
    } else if users.is_empty() {
        println!("No users registered.");
    } else {
        for (name, role) in &users {
            println!("{name}\t{role}");
        }
    }
    Ok(())
}

fn fulltext(store: &DocumentStore, action: FulltextAction) -> error::Result<()> {
    let mut info = store.fulltext_info()?;

    match action {
        FulltextAction::Show { json } => {
            if json {
                println!("{}", serde_json::to_string(&info)?);
            } else {
                print_types("Included", &info.included_types);
                print_types("Excluded", &info.excluded_types);
            }
            return Ok(());
        }
        FulltextAction::Include { doc_type } => {
            info.excluded_types.remove(&doc_type);
            info.included_types.insert(doc_type);
        }
        FulltextAction::Exclude { doc_type } => {
            info.included_types.remove(&doc_type);
            info.excluded_types.insert(doc_type);
        }
        FulltextAction::Reset => info = FulltextInfo::default(),
    }

    store.set_fulltext_info(&info)?;
    println!("Fulltext configuration updated.");
    Ok(())
}

fn print_types(label: &str, types: &std::collections::BTreeSet<String>) {
    if types.is_empty() {
        println!("{label}: (all)");
    } else {
        let joined: Vec<&str> = types.iter().map(String::as_str).collect();
        println!("{label}: {}", joined.join(", "));
    }
}

fn config_show(store: &DocumentStore, json: bool) -> error::Result<()> {
    let config = store.reindex_config()?;
    if json {
        println!(
            "{}",
            json!({
                "repository_name": config.repository,
                "change_trigger": config.change_trigger,
                "job_marker": config.job_marker,
            })
        );
    } else {
        println!("{}: {}", settings::REPOSITORY_NAME, config.repository);
        println!("{}: {}", settings::CHANGE_TRIGGER, config.change_trigger);
        println!("{}: {}", settings::JOB_MARKER, config.job_marker);
    }
    Ok(())
}

fn cmd_search(data_dir: &DataDir, args: &SearchArgs) -> error::Result<()> {
    let index = FulltextIndex::open(&data_dir.fulltext_dir()?)?;
    let hits = index.search(&args.query, args.doc_type.as_deref(), args.count)?;

    if args.json {
        let entries: Vec<_> = hits
            .iter()
            .map(|hit| {
                json!({
                    "score": hit.score,
                    "id": hit.id,
                    "type": hit.doc_type,
                    "title": hit.title,
                })
            })
            .collect();
        println!(
            "{}",
            json!({ "query": args.query, "results": entries })
        );
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for hit in &hits {
            println!(
                "{:.3}\t{}\t{}\t{}",
                hit.score, hit.id, hit.doc_type, hit.title
            );
        }
    }
    Ok(())
}

fn cmd_status(
    store: &DocumentStore,
    data_dir: &DataDir,
    json: bool,
) -> error::Result<()> {
    let config = store.reindex_config()?;
    let stats = store.stats(&config.job_marker)?;
    let users = store.list_users()?.len();
    let indexed = FulltextIndex::open(&data_dir.fulltext_dir()?)?.num_docs()?;

    if json {
        println!(
            "{}",
            json!({
                "data_dir": data_dir.root().display().to_string(),
                "repository": config.repository,
                "documents": stats.documents,
                "live": stats.live,
                "pending_jobs": stats.pending_jobs,
                "indexed": indexed,
                "users": users,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Repository: {}", config.repository);
        println!("Documents: {} ({} live)", stats.documents, stats.live);
        println!("Pending fulltext jobs: {}", stats.pending_jobs);
        println!("Indexed documents: {indexed}");
        println!("Users: {users}");
    }
    Ok(())
}
