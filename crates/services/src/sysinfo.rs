//! CPU load and SoC temperature for the diagnostic report.

use std::fs;
use std::io;

const PROC_STAT: &str = "/proc/stat";
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Aggregate cpu counters from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

fn parse_cpu_line(stat: &str) -> io::Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no cpu line in /proc/stat"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map_while(|f| f.parse().ok())
        .collect();
    if fields.len() < 5 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "short cpu line in /proc/stat",
        ));
    }
    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        busy: total - idle,
        total,
    })
}

/// Load sampler; each call reports the busy percentage since the
/// previous one.
pub struct CpuLoad {
    last: CpuTimes,
}

impl CpuLoad {
    pub fn new() -> io::Result<Self> {
        let last = parse_cpu_line(&fs::read_to_string(PROC_STAT)?)?;
        Ok(Self { last })
    }

    pub fn sample(&mut self) -> io::Result<u8> {
        let curr = parse_cpu_line(&fs::read_to_string(PROC_STAT)?)?;
        let load = load_percent(self.last, curr);
        self.last = curr;
        Ok(load)
    }
}

fn load_percent(prev: CpuTimes, curr: CpuTimes) -> u8 {
    let total = curr.total.saturating_sub(prev.total);
    if total == 0 {
        return 0;
    }
    let busy = curr.busy.saturating_sub(prev.busy);
    (busy * 100 / total).min(100) as u8
}

/// SoC temperature in whole degrees, 0 when the sensor is absent.
pub fn read_temperature() -> u8 {
    fs::read_to_string(THERMAL_ZONE)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(|millideg| (millideg / 1000).clamp(0, u8::MAX as i64) as u8)
        .unwrap_or(0)
}
