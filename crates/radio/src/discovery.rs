//! Wireless interface discovery and chipset classification via sysfs.
//!
//! An interface is wireless iff `/sys/class/net/<if>/phy80211` exists.
//! The driver name from the device uevent decides which injection
//! header variant the card needs; drivers we have never seen get the
//! Ralink treatment, which is the most conservative of the three.

use std::fs;
use std::path::Path;

use rovercast_core::Chipset;

use crate::RadioError;

const SYS_NET: &str = "/sys/class/net";

const ATHEROS_DRIVERS: &[&str] = &["ath9k_htc"];
const REALTEK_DRIVERS: &[&str] = &["8812au", "8814au", "rtl8812au", "rtl8814au", "rtl88xxau"];

/// Interface names with an 802.11 phy, sorted for stable adapter
/// indices across runs.
pub fn list_wireless_interfaces() -> Result<Vec<String>, RadioError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(SYS_NET)? {
        let entry = entry?;
        if entry.path().join("phy80211").exists() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

pub fn classify(ifname: &str) -> Result<Chipset, RadioError> {
    let uevent = Path::new(SYS_NET).join(ifname).join("device/uevent");
    let contents = fs::read_to_string(uevent)?;
    Ok(classify_uevent(&contents, ifname))
}

fn classify_uevent(uevent: &str, ifname: &str) -> Chipset {
    let driver = uevent
        .lines()
        .find_map(|line| line.strip_prefix("DRIVER="))
        .unwrap_or("")
        .trim();

    if ATHEROS_DRIVERS.contains(&driver) {
        Chipset::Atheros
    } else if REALTEK_DRIVERS.contains(&driver) {
        Chipset::Realtek
    } else {
        log::debug!("driver {driver:?} on {ifname}: assuming Ralink-class injection");
        Chipset::Ralink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_drivers_classify() {
        assert_eq!(
            classify_uevent("DRIVER=ath9k_htc\nOF_NAME=x\n", "wlan0"),
            Chipset::Atheros
        );
        assert_eq!(
            classify_uevent("DRIVER=rtl88xxau\n", "wlan1"),
            Chipset::Realtek
        );
        assert_eq!(classify_uevent("DRIVER=rt2800usb\n", "wlan2"), Chipset::Ralink);
    }

    #[test]
    fn missing_driver_line_defaults_to_ralink() {
        assert_eq!(classify_uevent("PCI_ID=dead:beef\n", "wlan0"), Chipset::Ralink);
    }
}
