//! `--simulate`: an in-memory Excel with a few open workbooks and a user who
//! keeps switching sheets.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use excel_link::{LinkConfig, MemoryHost};
use tempfile::NamedTempFile;

const DEMO_WORKBOOKS: &[(&str, &[&str])] = &[
    (r"C:\Quotes\2024-Q3.xlsx", &["Summary", "Items", "Notes"]),
    (r"C:\Quotes\Pricing.xlsx", &["Sheet1", "Sheet2"]),
];

const TEMPLATE_SHEETS: &[&str] = &["Quote", "Items", "Terms"];

const SWITCH_INTERVAL: Duration = Duration::from_millis(1500);

/// A running simulated instance. `template` is known to it with a few sheets;
/// the file itself still has to exist on disk.
pub fn demo_host(template: &Path) -> MemoryHost {
    DEMO_WORKBOOKS
        .iter()
        .fold(MemoryHost::new(), |host, (name, sheets)| {
            host.with_workbook(name, sheets)
        })
        .with_file(template, TEMPLATE_SHEETS)
}

/// Point `config` at a stand-in template file when the configured one does
/// not exist. The file is deleted when the returned guard is dropped.
pub fn seed_template(config: &mut LinkConfig) -> Result<Option<NamedTempFile>> {
    if config.resolved_template_path().is_file() {
        return Ok(None);
    }
    let file = tempfile::Builder::new()
        .prefix("S2BTemplate-")
        .suffix(".xlsx")
        .tempfile()
        .context("Failed to create a simulated template file")?;
    config.template_path = Some(file.path().to_path_buf());
    Ok(Some(file))
}

/// Activates sheets round-robin across every open workbook until dropped.
pub struct SheetActivity {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SheetActivity {
    pub fn start(host: MemoryHost) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::spawn(move || {
            let mut step = 0;
            loop {
                thread::sleep(SWITCH_INTERVAL);
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                if let Some((workbook, sheet)) = pick(&host, step) {
                    host.activate_sheet(&workbook, &sheet);
                }
                step += 1;
            }
        });
        Self {
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for SheetActivity {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn pick(host: &MemoryHost, step: usize) -> Option<(String, String)> {
    let pairs: Vec<(String, String)> = host
        .open_workbooks()
        .into_iter()
        .flat_map(|workbook| {
            host.sheets_of(&workbook)
                .unwrap_or_default()
                .into_iter()
                .map(move |sheet| (workbook.clone(), sheet))
        })
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs[step % pairs.len()].clone())
    }
}
