// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_loadavg_line() {
    let load = parse_loadavg("0.52 1.04 2.08 2/1024 12345\n").unwrap();
    assert_eq!(load.one, 0.52);
    assert_eq!(load.five, 1.04);
    assert_eq!(load.fifteen, 2.08);
}

#[test]
fn short_loadavg_is_none() {
    assert!(parse_loadavg("0.52 1.04\n").is_none());
    assert!(parse_loadavg("").is_none());
}

#[test]
fn parses_meminfo() {
    let text = "MemTotal:       16316412 kB\n\
                MemFree:         1179648 kB\n\
                MemAvailable:    8158206 kB\n\
                Buffers:          524288 kB\n";
    let mem = parse_meminfo(text).unwrap();
    assert_eq!(mem.total_kb, 16316412);
    assert_eq!(mem.available_kb, 8158206);
    assert!((mem.used_percent() - 50.0).abs() < 0.01);
}

#[test]
fn meminfo_without_available_is_none() {
    assert!(parse_meminfo("MemTotal: 1024 kB\n").is_none());
}

#[test]
fn used_percent_handles_zero_total() {
    let mem = MemoryUsage {
        total_kb: 0,
        available_kb: 0,
    };
    assert_eq!(mem.used_percent(), 0.0);
}

#[test]
fn proc_stats_read_on_linux() {
    let stats = ProcHostStats::new();
    if let Some(load) = stats.load_averages() {
        assert!(load.one >= 0.0);
    }
    if let Some(mem) = stats.memory() {
        assert!(mem.total_kb > 0);
        assert!(mem.used_percent() >= 0.0 && mem.used_percent() <= 100.0);
    }
}

#[test]
fn fake_stats_are_scriptable() {
    let fake = FakeHostStats::new();
    assert!(fake.load_averages().is_none());
    fake.set_load(1.0, 2.0, 3.0);
    fake.set_memory(1000, 250);
    assert_eq!(fake.load_averages().unwrap().fifteen, 3.0);
    assert!((fake.memory().unwrap().used_percent() - 75.0).abs() < 0.01);
    fake.clear();
    assert!(fake.memory().is_none());
}
