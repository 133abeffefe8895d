// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_is_recent() {
    let now = SystemClock.epoch_f64();
    // Sometime after 2020 and before 2100.
    assert!(now > 1_577_836_800.0);
    assert!(now < 4_102_444_800.0);
}

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::at(1_000);
    assert_eq!(clock.epoch_secs(), 1_000);
    clock.advance_secs(90);
    assert_eq!(clock.epoch_secs(), 1_090);
}

#[test]
fn fake_clock_clones_share_time() {
    let clock = FakeClock::at(50);
    let other = clock.clone();
    clock.advance_secs(10);
    assert_eq!(other.epoch_secs(), 60);
}
