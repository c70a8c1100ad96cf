//! excel-link CLI - attach to a running Excel and follow the active sheet

mod logging;
mod report;
mod simulate;

use std::io;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use excel_link::{
    BindOutcome, Candidate, CandidateList, ConnectionManager, ExcelHost, LinkConfig, LinkEvent,
};

/// How long each event-pump slice lasts while following a workbook.
const PUMP_SLICE: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "excel-link")]
#[command(
    author,
    version,
    about = "Attach to a running Excel instance and follow the active sheet"
)]
struct Cli {
    /// Use an in-memory Excel simulation instead of the real application
    /// (a stand-in template file is created if none exists)
    #[arg(long, global = true)]
    simulate: bool,

    /// Automation ProgID of the application to attach to
    #[arg(long, global = true, default_value = "Excel.Application")]
    prog_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the workbooks open in the running Excel instance
    #[command(alias = "ls")]
    List,

    /// Bind an open workbook and print sheet changes until Enter is pressed
    Connect {
        /// Full path of the workbook, or its number in `list` output
        workbook: String,
    },

    /// Create a workbook from the template and follow it
    Template {
        /// Template workbook (default: Resources/S2BTemplate.xlsx next to the executable)
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Keep a newly launched Excel window hidden
        #[arg(long)]
        hidden: bool,
    },
}

impl Cli {
    fn config(&self) -> LinkConfig {
        let mut config = LinkConfig::default();
        if let Commands::Template { template, hidden } = &self.command {
            config.template_path = template.clone();
            config.launch_visible = !hidden;
        }
        config
    }
}

fn main() -> ExitCode {
    logging::init_stderr_logging();
    report::install_panic_hook();

    let cli = Cli::parse();
    match panic::catch_unwind(|| run(&cli)) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            report::print_error(&err);
            ExitCode::FAILURE
        }
        // Already reported by the panic hook.
        Err(_) => ExitCode::FAILURE,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = cli.config();

    if cli.simulate {
        let _template = simulate::seed_template(&mut config)?;
        let host = simulate::demo_host(&config.resolved_template_path());
        let _activity = simulate::SheetActivity::start(host.clone());
        return execute(host, config, &cli.command);
    }

    #[cfg(windows)]
    {
        let host = excel_link_com::ComHost::with_prog_id(cli.prog_id.as_str())
            .context("Failed to initialize COM")?;
        execute(host, config, &cli.command)
    }

    #[cfg(not(windows))]
    {
        bail!(
            "Automating {} requires Windows; use --simulate to try the in-memory host",
            cli.prog_id
        )
    }
}

fn execute<H: ExcelHost>(host: H, config: LinkConfig, command: &Commands) -> Result<()> {
    let mut manager = ConnectionManager::with_observer(host, config, print_event);

    match command {
        Commands::List => {
            let candidates = manager.discover();
            if candidates.is_empty() {
                println!("No running Excel instance found");
            } else {
                print_candidates(candidates);
            }
            Ok(())
        }
        Commands::Connect { workbook } => {
            let candidates = manager.discover().clone();
            let selection = select(&candidates, workbook);
            match manager
                .bind(&selection)
                .with_context(|| format!("Failed to connect to '{selection}'"))?
            {
                BindOutcome::Bound { .. } => {}
                BindOutcome::NoSelection => bail!("Nothing to connect to: {selection}"),
                BindOutcome::NotFound => {
                    bail!("'{workbook}' is not open in a running Excel instance")
                }
            }
            follow(&mut manager)
        }
        Commands::Template { .. } => {
            let template = manager.config().resolved_template_path();
            manager
                .launch_from_template(&template)
                .with_context(|| format!("Failed to launch from '{}'", template.display()))?;
            follow(&mut manager)
        }
    }
}

/// Interpret `arg` as a 1-based number from `list` output, falling back to a path.
fn select(candidates: &CandidateList, arg: &str) -> Candidate {
    arg.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| candidates.get(i))
        .cloned()
        .unwrap_or_else(|| Candidate::from(arg))
}

/// Pump events until Enter is pressed (or stdin closes), then disconnect.
fn follow<H: ExcelHost>(manager: &mut ConnectionManager<H>) -> Result<()> {
    println!("Following the active sheet; press Enter to disconnect.");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });

    let pumped = loop {
        if let Err(e) = manager.pump_events(PUMP_SLICE) {
            break Err(e).context("Event pump failed");
        }
        match rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break Ok(()),
            Err(TryRecvError::Empty) => {}
        }
    };

    manager.disconnect();
    pumped
}

fn print_candidates(candidates: &CandidateList) {
    for (i, candidate) in candidates.iter().enumerate() {
        if candidate.is_selectable() {
            println!("{:>3}. {candidate}", i + 1);
        } else {
            println!("     {candidate}");
        }
    }
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::Connected { workbook, sheet } => {
            println!("Connected to {workbook} (active sheet: {sheet})")
        }
        LinkEvent::WorkbookRenamed { workbook } => println!("Workbook saved as {workbook}"),
        LinkEvent::SheetChanged { sheet } => println!("Active sheet: {sheet}"),
        LinkEvent::Disconnected => println!("Disconnected"),
        LinkEvent::CandidatesChanged(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    fn listed() -> CandidateList {
        let host = excel_link::MemoryHost::new()
            .with_workbook(r"C:\A.xlsx", &["Sheet1"])
            .with_workbook(r"C:\B.xlsx", &["Sheet1"]);
        let mut manager = ConnectionManager::new(host, LinkConfig::default());
        manager.discover().clone()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_select_by_number() {
        assert_eq!(select(&listed(), "2"), Candidate::from(r"C:\B.xlsx"));
    }

    #[test]
    fn test_select_out_of_range_falls_back_to_path() {
        assert_eq!(select(&listed(), "0"), Candidate::from("0"));
        assert_eq!(select(&listed(), "7"), Candidate::from("7"));
    }

    #[test]
    fn test_select_by_path() {
        assert_eq!(select(&listed(), r"C:\A.xlsx"), Candidate::from(r"C:\A.xlsx"));
    }

    #[test]
    fn test_template_flags_override_config() {
        let cli = Cli::parse_from(["excel-link", "template", "-t", "custom.xlsx", "--hidden"]);
        let config = cli.config();
        assert_eq!(config.template_path, Some(PathBuf::from("custom.xlsx")));
        assert!(!config.launch_visible);
    }

    #[test]
    fn test_simulated_connect_binds_by_number() {
        let host = simulate::demo_host(std::path::Path::new("unused.xlsx"));
        let mut manager = ConnectionManager::new(host.clone(), LinkConfig::default());
        let candidates = manager.discover().clone();
        let selection = select(&candidates, "2");
        assert!(matches!(
            manager.bind(&selection).unwrap(),
            BindOutcome::Bound { .. }
        ));
        assert_eq!(manager.workbook_name().as_deref(), Some("Pricing.xlsx"));
        manager.disconnect();
        assert_eq!(host.live_handles(), 0);
    }
}
