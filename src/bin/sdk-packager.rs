use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sdk_packager::component::{CatalogOptions, ComponentCatalog};
use sdk_packager::config::{IniDocument, Substitutions};
use sdk_packager::ifw::prepare_ifw_tools;
use sdk_packager::layout::RepositoryLayout;
use sdk_packager::preflight::{check_host_tools, check_required_tools, EXTRACT_TOOLS};
use sdk_packager::publish::{
    default_work_dir, prepare_task_sources, update_repositories, PublishAction, PublishTargets,
};
use sdk_packager::remote::{is_safe_repo_directory, LocalHost, RemoteFileOps, RemoteRepository, SshRemote};
use sdk_packager::resolver::{ArchiveLocationResolver, HttpProbe};
use sdk_packager::sync::ProductionSync;
use sdk_packager::tasks::{append_to_task_filters, format_task_filters, parse_config, string_to_bool};
use sdk_packager::PlatformInfo;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOCALHOST: &str = "localhost";

fn usage() -> &'static str {
    "Usage:\n  \
     sdk-packager validate <target-config> [--configurations-dir <dir>] [--license <type>] [--server <base-url>] [--substitution <pattern=value>]... [--offline] [--strict] [--dry-run]\n  \
     sdk-packager resolve <target-config> <component> <server> <uri> [--configurations-dir <dir>]\n  \
     sdk-packager tasks [<release-config>] [--task-filter <filter>]...\n  \
     sdk-packager publish <host> <license> <repo-domain> [--config <release-config>] [--root <dir>] [--remote-home <dir>] [--ifw-tools <uri>] [--work-dir <dir>] [--staging <yes|no>] [--production <yes|no>] [--rta <url>] [--sync-s3 <bucket>] [--sync-ext <login@server:/path>] [--task-filter <filter>]...\n  \
     sdk-packager repo check-safe <path>...\n  \
     sdk-packager repo backup <host> <repo>\n  \
     sdk-packager repo reset <host> <source> <target>\n  \
     sdk-packager repo update <host> <repogen> <pkg-dir> <target>\n  \
     sdk-packager ifw prepare <uri> [<work-dir>]\n  \
     sdk-packager preflight\n\n\
     <host> is `localhost` or an ssh login such as `user@server`.\n\
     Environment: RELEASE_DESCRIPTION_FILE, STAGING_SERVER_ROOT, IFW_TOOLS, RUST_LOG"
}

fn main() -> Result<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, rest @ ..] if cmd == "validate" => validate(CliArgs::parse(rest)?),
        [cmd, rest @ ..] if cmd == "resolve" => resolve(CliArgs::parse(rest)?),
        [cmd, rest @ ..] if cmd == "tasks" => list_tasks(CliArgs::parse(rest)?),
        [cmd, rest @ ..] if cmd == "publish" => publish(CliArgs::parse(rest)?),
        [repo, check, paths @ ..] if repo == "repo" && check == "check-safe" && !paths.is_empty() => {
            check_safe(paths)
        }
        [repo, backup, host, target] if repo == "repo" && backup == "backup" => {
            let backup = repository(host)
                .create_remote_repository_backup(target)
                .with_context(|| format!("backing up '{}' on {}", target, host))?;
            println!("{}", backup);
            Ok(())
        }
        [repo, reset, host, source, target] if repo == "repo" && reset == "reset" => repository(host)
            .reset_new_remote_repository(source, target)
            .with_context(|| format!("resetting '{}' from '{}' on {}", target, source, host)),
        [repo, update, host, repogen, pkg, target] if repo == "repo" && update == "update" => {
            let outcome = repository(host)
                .update_remote_repository(repogen, pkg, target)
                .with_context(|| format!("updating '{}' from '{}' on {}", target, pkg, host))?;
            println!("backup: {}", outcome.backup);
            for component in &outcome.changed_components {
                println!("updated: {}", component);
            }
            Ok(())
        }
        [ifw, prepare, uri] if ifw == "ifw" && prepare == "prepare" => {
            prepare_ifw(uri, &default_work_dir().context("resolving current directory")?)
        }
        [ifw, prepare, uri, work_dir] if ifw == "ifw" && prepare == "prepare" => {
            prepare_ifw(uri, Path::new(work_dir))
        }
        [cmd] if cmd == "preflight" => {
            check_host_tools().context("checking publish tools")?;
            check_required_tools(EXTRACT_TOOLS).context("checking archive tools")?;
            println!("all required host tools found");
            Ok(())
        }
        _ => bail!(usage()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Positionals plus `--flag` / `--option value` pairs; repeated options accumulate.
#[derive(Debug, Default)]
struct CliArgs {
    positional: Vec<String>,
    flags: Vec<String>,
    options: Vec<(String, String)>,
}

const FLAGS: &[&str] = &["--offline", "--strict", "--dry-run"];

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if FLAGS.contains(&arg.as_str()) {
                parsed.flags.push(arg.clone());
            } else if let Some(name) = arg.strip_prefix("--") {
                let Some(value) = iter.next() else {
                    bail!("option '{}' needs a value\n\n{}", arg, usage());
                };
                parsed.options.push((name.to_string(), value.clone()));
            } else {
                parsed.positional.push(arg.clone());
            }
        }
        Ok(parsed)
    }

    fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f.trim_start_matches("--") == name)
    }

    fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn all(&self, name: &str) -> Vec<String> {
        self.options
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Option value, else the environment variable `env`.
    fn option_or_env(&self, name: &str, env: &str) -> Option<String> {
        self.option(name)
            .map(str::to_string)
            .or_else(|| std::env::var(env).ok().filter(|v| !v.is_empty()))
    }
}

fn load_document(path: &Path) -> Result<IniDocument> {
    IniDocument::load(path).with_context(|| format!("reading configuration '{}'", path.display()))
}

fn configurations_dir(args: &CliArgs, config: &Path) -> PathBuf {
    match args.option("configurations-dir") {
        Some(dir) => PathBuf::from(dir),
        None => config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

fn build_resolver(args: &CliArgs, doc: &IniDocument, config: &Path) -> Result<ArchiveLocationResolver> {
    let substitutions =
        Substitutions::parse_pairs(args.all("substitution")).context("parsing --substitution values")?;
    let probe = HttpProbe::new().context("creating http client")?;
    let resolver = ArchiveLocationResolver::from_config(
        doc,
        args.option("server"),
        configurations_dir(args, config),
        substitutions,
        Box::new(probe),
    )
    .with_context(|| format!("setting up archive resolution for '{}'", config.display()))?;
    resolver.registry().log_servers();
    Ok(resolver)
}

fn validate(args: CliArgs) -> Result<()> {
    let [config] = args.positional.as_slice() else {
        bail!(usage());
    };
    let config = Path::new(config);
    let doc = load_document(config)?;
    let resolver = build_resolver(&args, &doc, config)?;

    let mut options = CatalogOptions::from_config(&doc)
        .with_context(|| format!("reading package namespaces from '{}'", config.display()))?;
    options.license_type = args.option("license").unwrap_or_default().to_string();
    options.offline = args.flag("offline");
    options.strict = args.flag("strict");
    options.dry_run = args.flag("dry-run");

    let search_root = configurations_dir(&args, config);
    let catalog = ComponentCatalog::load(config, &search_root, &resolver, &options)
        .with_context(|| format!("validating components of '{}'", config.display()))?;
    info!(
        "{} components valid, {} skipped",
        catalog.components().len(),
        catalog.skipped().len()
    );
    println!("{}", catalog.report().to_json().context("serialising validation report")?);
    Ok(())
}

fn resolve(args: CliArgs) -> Result<()> {
    let [config, component, server, uri] = args.positional.as_slice() else {
        bail!(usage());
    };
    let config = Path::new(config);
    let doc = load_document(config)?;
    let resolver = build_resolver(&args, &doc, config)?;
    let resolved = resolver
        .resolve_full_uri(component, server, uri)
        .with_context(|| format!("resolving '{}' for component '{}'", uri, component))?;
    println!("{}", resolved);
    Ok(())
}

fn release_config(args: &CliArgs, positional: Option<&String>) -> Result<PathBuf> {
    positional
        .cloned()
        .or_else(|| args.option_or_env("config", "RELEASE_DESCRIPTION_FILE"))
        .map(PathBuf::from)
        .context("no release configuration given and RELEASE_DESCRIPTION_FILE is not set")
}

fn list_tasks(args: CliArgs) -> Result<()> {
    let config = release_config(&args, args.positional.first())?;
    let filters = format_task_filters(&args.all("task-filter"));
    let tasks = parse_config(&config, &filters)
        .with_context(|| format!("reading release tasks from '{}'", config.display()))?;
    for task in &tasks {
        println!("{}\t{}\t{}", task.name, task.config_file, task.repo_path);
    }
    Ok(())
}

fn publish(args: CliArgs) -> Result<()> {
    let [host, license, repo_domain] = args.positional.as_slice() else {
        bail!(usage());
    };
    let config = release_config(&args, None)?;
    let root = args
        .option_or_env("root", "STAGING_SERVER_ROOT")
        .context("no --root given and STAGING_SERVER_ROOT is not set")?;
    let ifw_tools = args
        .option_or_env("ifw-tools", "IFW_TOOLS")
        .context("no --ifw-tools given and IFW_TOOLS is not set")?;
    let targets = PublishTargets {
        staging: string_to_bool(args.option("staging").unwrap_or("yes"))?,
        production: string_to_bool(args.option("production").unwrap_or("no"))?,
    };
    let rta = args
        .option("rta")
        .filter(|url| !matches!(*url, "0" | "disable" | "false" | "no"));

    if host != LOCALHOST {
        check_host_tools().context("checking publish tools")?;
    }
    let platform = PlatformInfo::detect();
    let work_dir = match args.option("work-dir") {
        Some(dir) => PathBuf::from(dir),
        None => default_work_dir().context("resolving current directory")?,
    };

    let filters = append_to_task_filters(&format_task_filters(&args.all("task-filter")), "repository");
    let mut tasks = parse_config(&config, &filters)
        .with_context(|| format!("reading release tasks from '{}'", config.display()))?;
    prepare_task_sources(&mut tasks, &work_dir);

    let tools_root = prepare_ifw_tools(&ifw_tools, &work_dir, &platform)
        .with_context(|| format!("preparing ifw tools from '{}'", ifw_tools))?;
    let remote_home = args.option("remote-home").unwrap_or(&root);

    let layout = RepositoryLayout::new(root.as_str(), license.as_str(), repo_domain.as_str());
    let repo = repository(host);
    let actions = update_repositories(&repo, &layout, &tasks, targets, rta, &tools_root, remote_home)
        .with_context(|| format!("publishing {} tasks to {}", tasks.len(), host))?;

    for action in &actions {
        match action {
            PublishAction::Reset { target } => println!("reset: {}", target),
            PublishAction::Updated { target, outcome } => {
                println!("updated: {} ({})", target, outcome.changed_components.join(", "))
            }
        }
    }

    let sync = production_sync(&args, remote_home);
    if sync.is_enabled() {
        for script in sync
            .run(&repo, &layout, &tasks)
            .with_context(|| format!("syncing production repositories from {}", host))?
        {
            println!("synced: {}", script);
        }
    }
    Ok(())
}

fn production_sync(args: &CliArgs, remote_home: &str) -> ProductionSync {
    let mut sync = ProductionSync::new(remote_home);
    if let Some(bucket) = args.option("sync-s3") {
        sync = sync.with_s3(bucket);
    }
    if let Some(ext) = args.option("sync-ext") {
        sync = sync.with_ext(ext);
    }
    sync
}

fn check_safe(paths: &[String]) -> Result<()> {
    is_safe_repo_directory(paths, &PlatformInfo::detect())?;
    println!("safe: {}", paths.join(" "));
    Ok(())
}

fn prepare_ifw(uri: &str, work_dir: &Path) -> Result<()> {
    let root = prepare_ifw_tools(uri, work_dir, &PlatformInfo::detect())
        .with_context(|| format!("preparing ifw tools from '{}'", uri))?;
    println!("{}", root.display());
    Ok(())
}

fn repository(host: &str) -> RemoteRepository {
    let remote: Box<dyn RemoteFileOps> = if host == LOCALHOST {
        Box::new(LocalHost)
    } else {
        Box::new(SshRemote::new(host))
    };
    RemoteRepository::new(remote, PlatformInfo::detect())
}
