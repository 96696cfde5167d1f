//! The `extract` subcommand: connect, enumerate, persist the facts, encode
//! and write one problem file per candidate goal.

use std::path::PathBuf;

use anyhow::bail;
use clap::ArgGroup;
use clap::Parser;
use micronix_connectors::SshTransport;
use micronix_connectors::TubeTransport;
use micronix_core::catalog::CapabilityCatalog;
use micronix_core::catalog::CveCatalog;
use micronix_core::encoder::Encoder;
use micronix_core::extractor::FactsExtractor;
use micronix_core::model::FactsContainer;
use micronix_core::pddl::Domain;
use micronix_core::transport::Transport;
use tracing::info;

const FACTS_FILE_STEM: &str = "extractor_data";
const PROBLEMS_DIR_STEM: &str = "generated_problems";

#[derive(Debug, Parser)]
#[clap(group = ArgGroup::new("mode").required(true).args(["ssh", "listen", "reverse"]))]
pub struct ExtractCommand {
    /// Port to connect or listen on, depending on the connection mode.
    #[arg(long, short = 'p')]
    pub port: u16,

    /// Target to connect to (required with --reverse and --ssh).
    #[arg(long, short = 't')]
    pub target: Option<String>,

    /// Reference PDDL domain file the generated problems bind to.
    #[arg(long, short = 'd')]
    pub domain: PathBuf,

    /// Label appended to the persisted facts file and the problems directory.
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Match installed binaries against the CVE catalog, assuming none of
    /// them are patched.
    #[arg(long = "unpatched-cves", default_value_t = false)]
    pub unpatched_cves: bool,

    /// Connect to the host via SSH.
    #[arg(long, short = 's')]
    pub ssh: bool,

    /// Bind a port and wait for a reverse shell to connect back.
    #[arg(long, short = 'l')]
    pub listen: bool,

    /// Connect back to the host's exposed shell.
    #[arg(long, short = 'r')]
    pub reverse: bool,

    /// User for the SSH connection.
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Private key for the SSH connection.
    #[arg(long, short = 'k')]
    pub key: Option<PathBuf>,
}

pub async fn run_extract(cmd: ExtractCommand) -> anyhow::Result<()> {
    if !cmd.domain.exists() {
        bail!("domain file {} does not exist", cmd.domain.display());
    }
    if (cmd.reverse || cmd.ssh) && cmd.target.is_none() {
        bail!("--target is required with --reverse and --ssh");
    }

    let label = cmd
        .name
        .as_deref()
        .map(|name| format!("_{name}"))
        .unwrap_or_default();
    let facts_path = PathBuf::from(format!("{FACTS_FILE_STEM}{label}.json"));
    let problems_dir = PathBuf::from(format!("{PROBLEMS_DIR_STEM}{label}"));

    let facts = if facts_path.exists() {
        info!("loading persisted facts from {}", facts_path.display());
        FactsContainer::load(&facts_path)?
    } else {
        let facts = extract_facts(&cmd).await?;
        info!("persisting facts to {}", facts_path.display());
        facts.save(&facts_path)?;
        facts
    };

    let domain = Domain::from_file(&cmd.domain)?;
    let catalog = CapabilityCatalog::builtin()?;
    let mut encoder = Encoder::new(&facts, &catalog);
    let problems = encoder.generate_problems(&domain);

    if !problems_dir.exists() {
        info!("creating output directory {}", problems_dir.display());
        std::fs::create_dir_all(&problems_dir)?;
    }

    for problem in &problems {
        let path = problems_dir.join(format!("{}.pddl", problem.name));
        std::fs::write(&path, format!("{problem}\n"))?;
        info!("written problem {}", path.display());
    }

    Ok(())
}

async fn extract_facts(cmd: &ExtractCommand) -> anyhow::Result<FactsContainer> {
    let target = cmd.target.as_deref().unwrap_or_default();

    if cmd.ssh {
        let (Some(user), Some(key)) = (cmd.user.as_deref(), cmd.key.as_deref()) else {
            bail!("--user and --key are required with --ssh");
        };
        let transport = SshTransport::new(target, cmd.port, user, key)?;
        run_extraction(transport, cmd.unpatched_cves).await
    } else if cmd.listen {
        let transport = TubeTransport::listen(cmd.port).await?;
        run_extraction(transport, cmd.unpatched_cves).await
    } else {
        let transport = TubeTransport::connect(target, cmd.port).await?;
        run_extraction(transport, cmd.unpatched_cves).await
    }
}

async fn run_extraction<T: Transport>(
    transport: T,
    unpatched_cves: bool,
) -> anyhow::Result<FactsContainer> {
    let cve_catalog = CveCatalog::builtin()?;
    let mut extractor = FactsExtractor::new(transport, cve_catalog);
    extractor.extract(unpatched_cves).await?;
    Ok(extractor.into_container())
}
