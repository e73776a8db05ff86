//! Niva diagnostic CLI
//!
//! Connects to an ELM327 adapter, runs a full diagnostic and prints the
//! report as JSON.
//!
//! ```text
//! niva-diag --simulate
//! niva-diag --settings adapter.json --vin X9L212300C0123456
//! niva-diag --settings adapter.json --model chevrolet_niva --year 2007
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use niva_diag_lib::report::DiagnosticStatus;
use niva_diag_lib::{
    connect_with_retry, detect_from_vin, select_adapter, validators, ConnectionSettings, DiagnosticEvent,
    DiagnosticsEngine, EventKind, SimulatedAdapter, Transport, VehicleModel, VehicleProfile,
};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "niva-diag")]
#[command(version, about = "Chevrolet Niva diagnostics over an ELM327 adapter")]
struct Args {
    /// Run against the built-in simulated Niva instead of a real adapter
    #[arg(long, conflicts_with = "settings")]
    simulate: bool,

    /// Connection settings file (JSON)
    #[arg(long, required_unless_present = "simulate")]
    settings: Option<PathBuf>,

    /// Identify the vehicle from its VIN
    #[arg(long, conflicts_with = "model")]
    vin: Option<String>,

    /// Vehicle model, when no VIN is given
    #[arg(long, value_enum, requires = "year")]
    model: Option<VehicleModel>,

    /// Model year, used with --model
    #[arg(long, requires = "model")]
    year: Option<u16>,

    /// Clear trouble codes after the report if any were found
    #[arg(long)]
    clear: bool,
}

impl Args {
    fn profile(&self) -> Result<VehicleProfile> {
        if self.simulate {
            // The simulated adapter answers like a 2012 restyle
            return Ok(VehicleProfile::new(VehicleModel::ChevroletNivaRestyle, 2012));
        }
        if let Some(vin) = &self.vin {
            return detect_from_vin(vin)
                .profile(vin)
                .with_context(|| format!("Could not identify vehicle from VIN {}", vin));
        }
        match (self.model, self.year) {
            (Some(model), Some(year)) => Ok(VehicleProfile::new(model, year)),
            _ => bail!("Pass --vin, or --model with --year"),
        }
    }

    fn settings(&self) -> Result<ConnectionSettings> {
        let Some(path) = &self.settings else {
            return Ok(ConnectionSettings::default());
        };
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let settings: ConnectionSettings = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(validators::validate_settings(&settings)?)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let profile = args.profile()?;
    let settings = args.settings()?;
    let adapter = select_adapter(&profile)?;

    let transport = Arc::new(Transport::new());
    if args.simulate {
        transport.connect_link(
            Box::new(SimulatedAdapter::niva_demo()),
            &settings,
            &adapter.definitions.init_sequence,
        )?;
    } else {
        connect_with_retry(&transport, &settings, &adapter.definitions)?;
    }

    let engine = DiagnosticsEngine::new(
        transport.clone(),
        adapter.context().with_command_timeout(settings.command_timeout()),
    );
    engine.register_callback(EventKind::Status, |event| {
        if let DiagnosticEvent::Status { message, .. } = event {
            eprintln!("» {}", message);
        }
    });

    let report = engine.perform_full_diagnostic(profile.model.name())?.join();
    println!("{}", report.to_json()?);

    if args.clear && report.dtc_count() > 0 {
        if engine.clear_dtcs() {
            eprintln!("DTCs cleared");
        } else {
            eprintln!("Some ECUs did not confirm the clear");
        }
    }

    transport.disconnect();
    if report.diagnostic_status == DiagnosticStatus::Failed {
        bail!(
            "Diagnostic failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_model_and_year() {
        let args = Args::try_parse_from([
            "niva-diag", "--settings", "adapter.json", "--model", "chevrolet_niva", "--year", "2007",
        ])
        .unwrap();
        let profile = args.profile().unwrap();
        assert_eq!(profile.model, VehicleModel::ChevroletNiva);
        assert_eq!(profile.year, 2007);
    }

    #[test]
    fn test_args_rejects_incomplete_input() {
        assert!(Args::try_parse_from(["niva-diag"]).is_err());
        assert!(Args::try_parse_from(["niva-diag", "--settings", "a.json", "--model", "niva_travel"]).is_err());
        assert!(Args::try_parse_from(["niva-diag", "--simulate", "--settings", "a.json"]).is_err());
        assert!(Args::try_parse_from(["niva-diag", "--simulate", "--model", "lada_4x4", "--year", "2010"]).is_err());
    }

    #[test]
    fn test_args_simulate_uses_default_settings() {
        let args = Args::try_parse_from(["niva-diag", "--simulate"]).unwrap();
        assert_eq!(args.settings().unwrap().target, ConnectionSettings::default().target);
        assert_eq!(args.profile().unwrap().model, VehicleModel::ChevroletNivaRestyle);
    }
}
