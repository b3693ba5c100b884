use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{
    ConnectionMode, DeviceRecord, LiveMetrics, PartitionCatalog, RootState, UnlockState,
};
use crate::app::tools::commands::ROOT_USER_MARKER;

const DEVICES_HEADER: &str = "list of devices attached";

/// Partition names that are commonly flashed by users. Matching is by substring on the
/// lowercase name, so `boot_a` and `vendor_boot` count as standard.
pub const STANDARD_PARTITION_FRAGMENTS: &[&str] = &[
    "boot",
    "recovery",
    "system",
    "vendor",
    "super",
    "userdata",
    "dtbo",
    "vbmeta",
    "vbmeta_system",
    "vbmeta_vendor",
    "odm",
    "product",
    "system_ext",
    "my_product",
    "my_engineering",
    "my_stock",
    "my_heytap",
    "my_company",
    "my_carrier",
    "my_region",
    "my_preload",
    "my_manifest",
];

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn partition_token_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&CELL, r"partition-(?:size|type):([^:]+):")
}

fn partition_descriptor_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&CELL, r"\(bootloader\)\s*partition-.*:([^:]+)")
}

fn product_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&CELL, r"(?m)(?:^|[\s)])product:\s*(.*)$")
}

fn unlocked_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&CELL, r"(?m)(?:^|[\s)])unlocked:\s*(.*)$")
}

fn battery_level_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&CELL, r"level:\s*(\d+)")
}

fn battery_temperature_re() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&CELL, r"temperature:\s*(\d+)")
}

/// `adb devices` output. A line yields a bridge record when one of its tokens is `device`
/// and none is `offline`; otherwise a `sideload` token yields a sideload record.
pub fn parse_bridge_devices(output: &str) -> Vec<DeviceRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains(DEVICES_HEADER))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let serial = tokens.first()?.to_string();
            let has = |needle: &str| tokens.iter().skip(1).any(|token| *token == needle);
            if has("device") && !has("offline") {
                Some(DeviceRecord::new(ConnectionMode::Bridge, serial))
            } else if has("sideload") {
                Some(DeviceRecord::new(ConnectionMode::Sideload, serial))
            } else {
                None
            }
        })
        .collect()
}

/// `fastboot devices` output: every non-blank line is a device, serial first.
pub fn parse_bootloader_devices(output: &str) -> Vec<DeviceRecord> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|serial| DeviceRecord::new(ConnectionMode::Bootloader, serial))
        .collect()
}

/// `[ro.build.display.id]: [ABC.123]` -> `("ro.build.display.id", "ABC.123")`.
pub fn parse_getprop_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let (key_part, value_part) = trimmed.split_once("]: [")?;
    let key = key_part.trim_start_matches('[').trim();
    let value = value_part.strip_suffix(']').unwrap_or(value_part).trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

pub fn parse_getprop_map(output: &str) -> HashMap<String, String> {
    output.lines().filter_map(parse_getprop_line).collect()
}

/// Output of `getprop <key>`: the value is the trimmed text, blank means unset.
pub fn parse_getprop_value(output: &str) -> Option<String> {
    let value = output.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn parse_root_state(id_output: &str) -> RootState {
    if id_output.contains(ROOT_USER_MARKER) {
        RootState::Yes
    } else {
        RootState::No
    }
}

pub fn format_temperature(tenths: u32) -> String {
    format!("{:.1}°C", f64::from(tenths) / 10.0)
}

/// Fills battery and temperature from a `dumpsys battery` dump; misses keep `metrics` as is.
pub fn parse_battery_metrics(output: &str, metrics: &mut LiveMetrics) {
    if let Some(caps) = battery_level_re().and_then(|re| re.captures(output)) {
        metrics.battery = format!("{}%", &caps[1]);
    }
    if let Some(tenths) = battery_temperature_re()
        .and_then(|re| re.captures(output))
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        metrics.temperature = format_temperature(tenths);
    }
}

/// Use% column of the first data row of `df /data`.
pub fn parse_storage_usage(output: &str) -> Option<String> {
    let row = output.lines().nth(1)?;
    let columns: Vec<&str> = row.split_whitespace().collect();
    if columns.len() < 5 {
        return None;
    }
    Some(format!("{} used", columns[4]))
}

pub fn parse_unlock_state(value: &str) -> UnlockState {
    match value.trim().to_lowercase().as_str() {
        "yes" | "true" | "1" | "unlocked" => UnlockState::Unlocked,
        "no" | "false" | "0" | "locked" => UnlockState::Locked,
        _ => UnlockState::Unknown,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootloaderVars {
    pub product: Option<String>,
    pub unlocked: Option<String>,
}

/// `product:` and `unlocked:` from a `getvar all` dump. The first match wins; the key must
/// start a token so `partition-size:my_product:` is not read as a product name.
pub fn parse_bootloader_vars(output: &str) -> BootloaderVars {
    let capture = |re: Option<&Regex>| {
        re.and_then(|re| re.captures(output))
            .map(|caps| caps[1].trim().to_string())
            .filter(|value| !value.is_empty())
    };
    BootloaderVars {
        product: capture(product_re()),
        unlocked: capture(unlocked_re()),
    }
}

fn looks_like_noise(name: &str) -> bool {
    name.len() < 2 || name.to_lowercase().starts_with("0x")
}

/// Candidate partition names from a `getvar all` dump, deduplicated. Both patterns run on
/// every line and their matches are unioned, so the descriptor pattern also yields the
/// value after a `partition-type:NAME:` key (`raw`, `ext4`).
pub fn extract_partition_names(output: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for line in output.lines() {
        for re in [partition_token_re(), partition_descriptor_re()].into_iter().flatten() {
            if let Some(caps) = re.captures(line) {
                let name = caps[1].trim();
                if !looks_like_noise(name) {
                    found.insert(name.to_string());
                }
            }
        }
    }
    found
}

pub fn is_standard_partition(name: &str) -> bool {
    let lower = name.to_lowercase();
    STANDARD_PARTITION_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

pub fn categorize_partitions<I, S>(names: I) -> PartitionCatalog
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut standard = BTreeSet::new();
    let mut critical = BTreeSet::new();
    for name in names {
        let name = name.as_ref().trim();
        if looks_like_noise(name) {
            continue;
        }
        if is_standard_partition(name) {
            standard.insert(name.to_string());
        } else {
            critical.insert(name.to_string());
        }
    }
    PartitionCatalog {
        standard: standard.into_iter().collect(),
        critical: critical.into_iter().collect(),
    }
}

pub fn parse_partition_catalog(output: &str) -> PartitionCatalog {
    categorize_partitions(extract_partition_names(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bridge_devices_output() {
        let output = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\n0123456789ABCDEF\tdevice\nemulator-5554\toffline\nR58M\tsideload\nZY22\tunauthorized\n\n";
        let parsed = parse_bridge_devices(output);
        assert_eq!(
            parsed,
            vec![
                DeviceRecord::new(ConnectionMode::Bridge, "0123456789ABCDEF"),
                DeviceRecord::new(ConnectionMode::Sideload, "R58M"),
            ]
        );
    }

    #[test]
    fn offline_line_never_yields_bridge_record() {
        let lines = [
            "A offline",
            "A device offline",
            "A offline device",
            "A\tdevice product:x model:y offline",
        ];
        for line in lines {
            let output = format!("List of devices attached\n{line}\n");
            assert!(
                parse_bridge_devices(&output)
                    .iter()
                    .all(|record| record.mode != ConnectionMode::Bridge),
                "line {line:?} produced a bridge record"
            );
        }
    }

    #[test]
    fn long_listing_device_token_is_not_a_status() {
        let output = "List of devices attached\nA unauthorized usb:1-1 transport_id:2\nB device usb:1-2 product:p model:m device:d transport_id:3\n";
        let parsed = parse_bridge_devices(output);
        assert_eq!(parsed, vec![DeviceRecord::new(ConnectionMode::Bridge, "B")]);
    }

    #[test]
    fn parses_bootloader_devices_in_order() {
        let output = "ABCD1234\tfastboot\n\n   \nEFGH5678\tfastboot\n";
        let parsed = parse_bootloader_devices(output);
        assert_eq!(
            parsed,
            vec![
                DeviceRecord::new(ConnectionMode::Bootloader, "ABCD1234"),
                DeviceRecord::new(ConnectionMode::Bootloader, "EFGH5678"),
            ]
        );
    }

    #[test]
    fn parses_property_line() {
        assert_eq!(
            parse_getprop_line("[ro.build.display.id]: [ABC.123]"),
            Some(("ro.build.display.id".to_string(), "ABC.123".to_string()))
        );
        assert_eq!(parse_getprop_line("garbage"), None);
        let map = parse_getprop_map("[ro.product.model]: [Pixel 7]\n[ro.product.brand]: [google]\n");
        assert_eq!(map.get("ro.product.model").map(String::as_str), Some("Pixel 7"));
    }

    #[test]
    fn root_requires_uid_zero_marker() {
        assert_eq!(
            parse_root_state("uid=0(root) gid=0(root) groups=0(root) context=u:r:su:s0"),
            RootState::Yes
        );
        assert_eq!(
            parse_root_state("uid=2000(shell) gid=2000(shell) groups=1004(input)"),
            RootState::No
        );
    }

    #[test]
    fn parses_battery_scenario() {
        let output = "Current Battery Service state:\n  AC powered: false\n  level: 87\n  scale: 100\n  voltage: 4321\n  temperature: 312\n";
        let mut metrics = LiveMetrics::default();
        parse_battery_metrics(output, &mut metrics);
        assert_eq!(metrics.battery, "87%");
        assert_eq!(metrics.temperature, "31.2°C");
        assert_eq!(metrics.storage, "N/A");
    }

    #[test]
    fn whole_degree_temperature_keeps_one_decimal() {
        assert_eq!(format_temperature(300), "30.0°C");
    }

    #[test]
    fn parses_storage_use_column() {
        let output = "Filesystem     1K-blocks     Used Available Use% Mounted on\n/dev/block/dm-5 115249236 51862724  63255440  45% /data\n";
        assert_eq!(parse_storage_usage(output).as_deref(), Some("45% used"));
        assert_eq!(parse_storage_usage("Filesystem only\n"), None);
        assert_eq!(parse_storage_usage("header\nshort row\n"), None);
    }

    #[test]
    fn parses_bootloader_vars_from_dump() {
        let output = "(bootloader) version-bootloader:abl-1.0\n(bootloader) product:sdm845\n(bootloader) unlocked:yes\nall: Done!!\nFinished. Total time: 0.020s\n";
        let vars = parse_bootloader_vars(output);
        assert_eq!(vars.product.as_deref(), Some("sdm845"));
        assert_eq!(vars.unlocked.as_deref(), Some("yes"));
        assert_eq!(parse_unlock_state("yes"), UnlockState::Unlocked);
        assert_eq!(parse_unlock_state("no"), UnlockState::Locked);
        assert_eq!(parse_unlock_state("maybe"), UnlockState::Unknown);
    }

    #[test]
    fn product_key_must_start_a_token() {
        let output = "(bootloader) partition-size:my_product: 0x1000\n(bootloader) product:lahaina\n";
        assert_eq!(parse_bootloader_vars(output).product.as_deref(), Some("lahaina"));
    }

    #[test]
    fn missing_bootloader_vars_stay_unset() {
        assert_eq!(parse_bootloader_vars("< waiting for any device >\n"), BootloaderVars::default());
    }

    #[test]
    fn partition_scenario_splits_standard_and_critical() {
        let output = "partition-size:boot_a:0x4000000\npartition-size:abl_a:0x100000\n";
        let catalog = parse_partition_catalog(output);
        assert_eq!(catalog.standard, ["boot_a"]);
        assert_eq!(catalog.critical, ["abl_a"]);
    }

    #[test]
    fn unions_both_patterns_on_every_line() {
        let output = "(bootloader) partition-size:boot_b: 0x4000000\n(bootloader) partition-type:boot_b:raw\n(bootloader) partition-type:userdata:f2fs\n(bootloader) partition-size:xbl_a: 0x600000\n(bootloader) partition-size:my_heytap: 0x1000\n(bootloader) partition-type:modem_a:raw\n";
        let catalog = parse_partition_catalog(output);
        assert_eq!(catalog.standard, ["boot_b", "my_heytap", "userdata"]);
        assert_eq!(catalog.critical, ["f2fs", "modem_a", "raw", "xbl_a"]);
    }

    #[test]
    fn type_values_are_part_of_the_name_set() {
        let names = extract_partition_names(
            "(bootloader) partition-type:boot_b:raw\n(bootloader) partition-type:userdata:ext4\n",
        );
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            ["boot_b", "ext4", "raw", "userdata"]
        );
    }

    #[test]
    fn size_values_are_dropped_as_hex_noise() {
        let names = extract_partition_names("(bootloader) partition-size:super: 0x2a0000000\n");
        assert_eq!(names.into_iter().collect::<Vec<_>>(), ["super"]);
    }

    #[test]
    fn descriptor_pattern_catches_other_partition_lines() {
        let output = "(bootloader) partition-name:persist\n(bootloader) partition-info:0x20\n";
        let names = extract_partition_names(output);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), ["persist"]);
    }

    #[test]
    fn every_name_lands_in_exactly_one_category_and_noise_is_dropped() {
        let names = ["boot", "x", "0x1000", "0XDEAD", "abl_b", "Vendor_Boot", "abl_b", ""];
        let catalog = categorize_partitions(names);
        assert_eq!(catalog.standard, ["Vendor_Boot", "boot"]);
        assert_eq!(catalog.critical, ["abl_b"]);
        for name in &catalog.standard {
            assert!(!catalog.critical.contains(name));
        }
        for name in catalog.standard.iter().chain(catalog.critical.iter()) {
            assert!(name.len() >= 2);
            assert!(!name.to_lowercase().starts_with("0x"));
        }
    }
}
