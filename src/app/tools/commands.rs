//! Builders for every adb/fastboot invocation the tool issues, plus the high-risk
//! classification the front-end uses to gate confirmation dialogs.

use serde::{Deserialize, Serialize};

use crate::app::tools::command_line::CommandLine;
use crate::app::tools::locator::Toolchain;

pub const ROOT_USER_MARKER: &str = "uid=0(root)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    Normal,
    HighRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootTarget {
    System,
    Bootloader,
    Fastboot,
    Recovery,
    Sideload,
}

impl RebootTarget {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "system" => Some(RebootTarget::System),
            "bootloader" => Some(RebootTarget::Bootloader),
            "fastboot" | "fastbootd" => Some(RebootTarget::Fastboot),
            "recovery" => Some(RebootTarget::Recovery),
            "sideload" => Some(RebootTarget::Sideload),
            _ => None,
        }
    }

    fn arg(&self) -> Option<&'static str> {
        match self {
            RebootTarget::System => None,
            RebootTarget::Bootloader => Some("bootloader"),
            RebootTarget::Fastboot => Some("fastboot"),
            RebootTarget::Recovery => Some("recovery"),
            RebootTarget::Sideload => Some("sideload"),
        }
    }
}

fn adb(tools: &Toolchain, serial: &str) -> CommandLine {
    CommandLine::new(&tools.adb).scoped_to(serial)
}

fn fastboot(tools: &Toolchain, serial: &str) -> CommandLine {
    CommandLine::new(&tools.fastboot).scoped_to(serial)
}

pub fn adb_devices(tools: &Toolchain) -> CommandLine {
    CommandLine::new(&tools.adb).arg("devices")
}

pub fn adb_getprop(tools: &Toolchain, serial: &str, key: &str) -> CommandLine {
    adb(tools, serial).args(["shell", "getprop", key])
}

pub fn adb_id(tools: &Toolchain, serial: &str) -> CommandLine {
    adb(tools, serial).args(["shell", "id"])
}

pub fn adb_battery(tools: &Toolchain, serial: &str) -> CommandLine {
    adb(tools, serial).args(["shell", "dumpsys", "battery"])
}

pub fn adb_storage(tools: &Toolchain, serial: &str) -> CommandLine {
    adb(tools, serial).args(["shell", "df", "/data"])
}

pub fn adb_connect(tools: &Toolchain, address: &str) -> CommandLine {
    CommandLine::new(&tools.adb).args(["connect", address.trim()])
}

pub fn adb_pair(tools: &Toolchain, address: &str, code: &str) -> CommandLine {
    CommandLine::new(&tools.adb).args(["pair", address.trim(), code.trim()])
}

pub fn adb_install(tools: &Toolchain, serial: &str, apk_path: &str) -> CommandLine {
    adb(tools, serial).args(["install", apk_path])
}

pub fn adb_uninstall(tools: &Toolchain, serial: &str, package: &str) -> CommandLine {
    adb(tools, serial).args(["uninstall", package.trim()])
}

pub fn adb_reboot(tools: &Toolchain, serial: &str, target: RebootTarget) -> CommandLine {
    let cmd = adb(tools, serial).arg("reboot");
    match target.arg() {
        Some(mode) => cmd.arg(mode),
        None => cmd,
    }
}

pub fn adb_sideload(tools: &Toolchain, serial: &str, package_path: &str) -> CommandLine {
    adb(tools, serial).args(["sideload", package_path])
}

pub fn adb_push(tools: &Toolchain, serial: &str, local: &str, remote: &str) -> CommandLine {
    adb(tools, serial).args(["push", local, remote])
}

pub fn adb_su_shell(tools: &Toolchain, serial: &str, script: &str) -> CommandLine {
    adb(tools, serial).args(["shell", "su", "-c", script])
}

pub fn adb_logcat(tools: &Toolchain, serial: &str) -> CommandLine {
    adb(tools, serial).args(["logcat", "-v", "time"])
}

pub fn fastboot_devices(tools: &Toolchain) -> CommandLine {
    CommandLine::new(&tools.fastboot).arg("devices")
}

pub fn fastboot_getvar_all(tools: &Toolchain, serial: &str) -> CommandLine {
    fastboot(tools, serial).args(["getvar", "all"])
}

pub fn fastboot_flash(tools: &Toolchain, serial: &str, partition: &str, image_path: &str) -> CommandLine {
    fastboot(tools, serial).args(["flash", partition.trim(), image_path])
}

pub fn fastboot_erase(tools: &Toolchain, serial: &str, partition: &str) -> CommandLine {
    fastboot(tools, serial).args(["erase", partition.trim()])
}

pub fn fastboot_format(tools: &Toolchain, serial: &str, filesystem: &str, partition: &str) -> CommandLine {
    fastboot(tools, serial).args([format!("format:{}", filesystem.trim()), partition.trim().to_string()])
}

pub fn fastboot_reboot(tools: &Toolchain, serial: &str, target: RebootTarget) -> CommandLine {
    let cmd = fastboot(tools, serial).arg("reboot");
    match target.arg() {
        Some(mode) => cmd.arg(mode),
        None => cmd,
    }
}

/// fastboot options that consume the following argument.
const FASTBOOT_VALUE_OPTIONS: &[&str] = &[
    "-S",
    "-i",
    "-b",
    "-n",
    "-c",
    "--slot",
    "--base",
    "--cmdline",
    "--kernel-offset",
    "--ramdisk-offset",
    "--tags-offset",
    "--dtb",
    "--dtb-offset",
    "--page-size",
    "--header-version",
    "--os-version",
    "--os-patch-level",
];

/// adb global options that consume the following argument.
const ADB_VALUE_OPTIONS: &[&str] = &["-t", "-H", "-P", "-L"];

/// Positional words once leading options (and their values) are skipped: the verb first.
fn positional_args<'a>(args: &'a [String], value_options: &[&str]) -> Vec<&'a str> {
    let mut positional = Vec::new();
    let mut iter = args.iter().map(String::as_str);
    while let Some(arg) = iter.next() {
        if positional.is_empty() && arg.starts_with('-') && arg.len() > 1 {
            if !arg.contains('=') && value_options.contains(&arg) {
                iter.next();
            }
            continue;
        }
        positional.push(arg);
    }
    positional
}

fn is_destructive_shell(words: &[&str]) -> bool {
    let words: Vec<String> = words
        .iter()
        .flat_map(|word| word.split_whitespace())
        .map(str::to_lowercase)
        .collect();
    let recursive_rm = words.windows(2).any(|pair| {
        pair[0] == "rm" && pair[1].starts_with('-') && pair[1].contains('r')
    });
    let raw_write = words.iter().any(|word| word == "dd")
        && words.iter().any(|word| word.starts_with("of="));
    words.first().map(String::as_str) == Some("wipe")
        || words.iter().any(|word| word == "--wipe_data")
        || recursive_rm
        || raw_write
}

/// Commands that can wipe data or brick a device need an explicit confirmation.
pub fn classify_risk(command: &CommandLine) -> RiskLevel {
    let args = command.subcommand_args();

    let high = match command.tool_name().as_str() {
        "fastboot" => {
            let positional = positional_args(args, FASTBOOT_VALUE_OPTIONS);
            let verb = positional.first().map(|verb| verb.to_lowercase()).unwrap_or_default();
            let second = positional.get(1).map(|arg| arg.to_lowercase()).unwrap_or_default();
            (verb.starts_with("flash") && verb != "flashing")
                || matches!(verb.as_str(), "erase" | "update" | "wipe-super")
                || verb.starts_with("format")
                || (matches!(verb.as_str(), "flashing" | "oem")
                    && (second.starts_with("unlock") || second.starts_with("lock")))
                || args.iter().any(|arg| arg == "-w" || arg == "--wipe-and-use-fbe")
        }
        "adb" => {
            let positional = positional_args(args, ADB_VALUE_OPTIONS);
            match positional.split_first() {
                Some((verb, rest)) if verb.eq_ignore_ascii_case("uninstall") => !rest.is_empty(),
                Some((verb, rest)) if verb.eq_ignore_ascii_case("shell") => {
                    let script: Vec<&str> = rest
                        .iter()
                        .copied()
                        .skip_while(|arg| arg.starts_with('-'))
                        .collect();
                    is_destructive_shell(&script)
                }
                _ => false,
            }
        }
        _ => false,
    };

    if high {
        RiskLevel::HighRisk
    } else {
        RiskLevel::Normal
    }
}

pub fn is_high_risk(command: &CommandLine) -> bool {
    classify_risk(command) == RiskLevel::HighRisk
}
