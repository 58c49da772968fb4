/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    Command line front end for the boot integrity verification chain.

--*/

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{arg, value_parser, ArgMatches, Command};
use txt_hw_api::{HwError, MsrBank, MsrReader, PhysMem, TxtRegs};
use txt_verify::{run_all, CheckResult, FitImage, VerifyContext};

mod linux;

fn main() {
    env_logger::init();

    let cmd = Command::new("txt-check")
        .about("Verifies the platform is configured for a trusted measured boot chain")
        .arg_required_else_help(true)
        .subcommands(vec![
            Command::new("run")
                .about("Run the boot integrity check catalog")
                .arg(
                    arg!(--firmware <FILE> "Read the firmware image from a dump instead of /dev/mem")
                        .required(false)
                        .value_parser(value_parser!(PathBuf)),
                ),
            Command::new("platform")
                .about("Print the decoded platform security register state"),
        ])
        .get_matches();

    let result = match cmd.subcommand().unwrap() {
        ("run", args) => run_cmd(args),
        ("platform", _) => platform_cmd(),
        (_, _) => unreachable!(),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            log::error!("{err:#}");
            std::process::exit(2);
        }
    }
}

fn run_cmd(args: &ArgMatches) -> Result<i32> {
    let (image, mem) = load_image(args.get_one::<PathBuf>("firmware"))?;
    let msrs: Box<dyn MsrReader> = match linux::DevCpuMsr::probe() {
        Ok(dev) => Box::new(dev),
        Err(err) => {
            log::warn!("cannot enumerate /dev/cpu, register checks degrade: {err}");
            Box::new(linux::Unavailable::new("/dev/cpu", err))
        }
    };
    let txt: Box<dyn TxtRegs> = match linux::LiveTxt::open() {
        Ok(dev) => Box::new(dev),
        Err(err) => {
            log::warn!("cannot open the txt register space, chipset checks degrade: {err}");
            Box::new(linux::Unavailable::new("txt register space", err))
        }
    };
    log::info!(
        "firmware image loaded, running {} checks",
        txt_verify::CHECKS.len()
    );

    let ctx = VerifyContext::new(mem.as_ref(), msrs.as_ref(), txt.as_ref()).with_image(&image);
    let mut exit = 0;
    for (check, result) in run_all(&ctx) {
        match result {
            CheckResult::Pass => println!("[ OK ] {}", check.name()),
            CheckResult::Fail => {
                println!("[FAIL] {}", check.name());
                if check.required() {
                    exit = 1;
                }
            }
            CheckResult::Inconclusive(cause) => {
                println!("[ -- ] {}: {cause}", check.name());
                if check.required() {
                    exit = 1;
                }
            }
        }
    }
    Ok(exit)
}

/// Loads the firmware window. A live load needs /dev/mem; with a dump
/// supplied the device may be absent, leaving memory-dependent checks
/// to degrade to inconclusive.
fn load_image(dump: Option<&PathBuf>) -> Result<(FitImage, Box<dyn PhysMem>)> {
    match dump {
        Some(path) => {
            let image = FitImage::from_file(path)?;
            let mem: Box<dyn PhysMem> = match linux::DevMem::open() {
                Ok(dev) => Box::new(dev),
                Err(err) => {
                    log::warn!("cannot open /dev/mem, memory-dependent checks degrade: {err}");
                    Box::new(linux::Unavailable::new("/dev/mem", err))
                }
            };
            Ok((image, mem))
        }
        None => {
            let dev = linux::DevMem::open().context("cannot open /dev/mem")?;
            let image = FitImage::from_phys_mem(&dev)?;
            Ok((image, Box::new(dev)))
        }
    }
}

fn platform_cmd() -> Result<i32> {
    let msrs = linux::DevCpuMsr::probe().context("cannot enumerate /dev/cpu")?;
    let bank = MsrBank::new(&msrs);

    print_state("SMRR supported", bank.has_smrr().map(|v| v.to_string()));
    print_state(
        "SMRR",
        bank.smrr_info().map(|smrr| {
            format!(
                "active={} base={:#x} mask={:#x}",
                smrr.active, smrr.phys_base, smrr.phys_mask
            )
        }),
    );
    print_state(
        "Feature control locked",
        bank.feature_control_locked().map(|v| v.to_string()),
    );
    print_state(
        "VMX in SMX allowed",
        bank.vmx_allowed_in_smx().map(|v| v.to_string()),
    );
    print_state(
        "TXT leaf functions enabled",
        bank.txt_leaves_enabled().map(|v| v.to_string()),
    );
    print_state(
        "Debug interface",
        bank.debug_interface().map(|debug| {
            format!(
                "enabled={} locked={} pch_strap={}",
                debug.enabled, debug.locked, debug.pch_strap
            )
        }),
    );
    print_state("Platform id", bank.platform_id().map(|v| format!("{v:#x}")));

    let txt = linux::LiveTxt::open().context("cannot open the txt register space")?;
    print_state(
        "TXT chipset",
        txt.didvid().map(|id| {
            format!(
                "vid={:#06x} did={:#06x} rid={:#06x}",
                id.vendor_id, id.device_id, id.revision_id
            )
        }),
    );
    println!("CPU signature: {:#x}", txt.cpu_signature());
    Ok(0)
}

/// A register state line degrades to its cause instead of aborting the
/// whole report.
fn print_state(label: &str, value: Result<String, HwError>) {
    match value {
        Ok(value) => println!("{label}: {value}"),
        Err(err) => println!("{label}: unavailable ({err})"),
    }
}
