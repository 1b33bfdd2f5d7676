//! `enclave scan`.

use enclave_pm::ScanReport;

use crate::theme::Theme;

/// Print the report of the scan that ran when the registry was opened.
pub(crate) fn run(report: &ScanReport) {
    println!("{}", Theme::header("Startup scan"));
    println!("{}", Theme::kv("loaded", &report.loaded.len().to_string()));

    for name in &report.reconciled {
        println!("{}", Theme::info(&format!("reconciled {name} with the host image")));
    }
    for name in &report.provisioned {
        println!("{}", Theme::info(&format!("provisioned system package {name}")));
    }
    for name in &report.purged {
        println!("{}", Theme::warning(&format!("purged {name}")));
    }

    if report.purged.is_empty() {
        println!("{}", Theme::success("registry is consistent"));
    }
}
