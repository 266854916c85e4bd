// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Sample adapter device
//!
//! Registers the demo assembly set (input 100, output 150, config 151, two
//! heartbeats, one explicit-data assembly), reserves the matching
//! connection points and mirrors received output data back to the input
//! assembly, then runs the POSIX shim loop.

use clap::Parser;
use tracing::info;

use eipa::assembly::Assemblies;
use eipa::config::{resolve, CliArgs};
use eipa::error::{EipError, GeneralStatus};
use eipa::host::AdapterApplication;
use eipa::shim::Shim;
use eipa::stack::Stack;

const INPUT_ASSEMBLY: u16 = 100; // 0x64
const OUTPUT_ASSEMBLY: u16 = 150; // 0x96
const CONFIG_ASSEMBLY: u16 = 151; // 0x97
const HEARTBEAT_INPUT_ONLY_ASSEMBLY: u16 = 152; // 0x98
const HEARTBEAT_LISTEN_ONLY_ASSEMBLY: u16 = 153; // 0x99
const EXPLICIT_ASSEMBLY: u16 = 154; // 0x9a

const IO_SIZE: usize = 128;
const CONFIG_SIZE: usize = 64;

/// Demo application: mirrors the output assembly into the input assembly.
#[derive(Debug, Default)]
struct MirrorApp;

impl AdapterApplication for MirrorApp {
    fn application_initialization(&mut self, stack: &mut Stack) -> Result<(), EipError> {
        stack.create_assembly(INPUT_ASSEMBLY, vec![0; IO_SIZE])?;
        stack.create_assembly(OUTPUT_ASSEMBLY, vec![0; IO_SIZE])?;
        stack.create_assembly(CONFIG_ASSEMBLY, vec![0; CONFIG_SIZE])?;
        stack.create_assembly(HEARTBEAT_INPUT_ONLY_ASSEMBLY, Vec::new())?;
        stack.create_assembly(HEARTBEAT_LISTEN_ONLY_ASSEMBLY, Vec::new())?;
        stack.create_assembly(EXPLICIT_ASSEMBLY, vec![0; IO_SIZE])?;

        stack.configure_exclusive_owner_connection_point(
            OUTPUT_ASSEMBLY,
            INPUT_ASSEMBLY,
            Some(CONFIG_ASSEMBLY),
        );
        // a second point that connects without a config path
        stack.configure_exclusive_owner_connection_point(OUTPUT_ASSEMBLY, INPUT_ASSEMBLY, None);
        stack.configure_input_only_connection_point(
            HEARTBEAT_INPUT_ONLY_ASSEMBLY,
            INPUT_ASSEMBLY,
            Some(CONFIG_ASSEMBLY),
        );
        stack.configure_listen_only_connection_point(
            HEARTBEAT_LISTEN_ONLY_ASSEMBLY,
            INPUT_ASSEMBLY,
            Some(CONFIG_ASSEMBLY),
        );
        Ok(())
    }

    fn after_assembly_data_received(
        &mut self,
        assemblies: &mut Assemblies,
        instance_id: u16,
    ) -> Result<(), GeneralStatus> {
        match instance_id {
            OUTPUT_ASSEMBLY => {
                let output = assemblies
                    .get(OUTPUT_ASSEMBLY)
                    .expect("created at startup")
                    .data()
                    .to_vec();
                assemblies
                    .write(INPUT_ASSEMBLY, &output)
                    .expect("both assemblies share a size");
            }
            CONFIG_ASSEMBLY => {
                // any configuration is accepted by the demo device
            }
            _ => {}
        }
        Ok(())
    }

    fn check_io_connection_event(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        event: eipa::host::IoConnectionEvent,
    ) {
        info!(output_assembly, input_assembly, %event, "i/o connection event");
    }

    fn run_idle_changed(&mut self, run_idle: u32) {
        info!(run_idle, "run/idle header changed");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = match resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let mut stack = Stack::new(config);
    let mut app = MirrorApp;
    if let Err(e) = app.application_initialization(&mut stack) {
        eprintln!("application setup failed: {}", e);
        std::process::exit(1);
    }
    info!("demo assemblies and connection points registered");

    let mut shim = match Shim::bind() {
        Ok(shim) => shim,
        Err(e) => {
            eprintln!("network setup failed: {}", e);
            std::process::exit(1);
        }
    };

    shim.run(&mut stack, &mut app);
}
