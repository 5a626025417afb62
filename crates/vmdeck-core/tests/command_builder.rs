//! Integration tests for the emulator command builder.
//!
//! Each test builds a command line through the public API and checks the
//! device and binary choices that guests depend on.

use std::path::{Path, PathBuf};

use vmdeck_core::domain::command::build_command_with_probe;
use vmdeck_core::{
    build_command, Architecture, BootOrder, EmulatorLayout, MachineConfig, OsFamily,
    VideoAdapter,
};

fn layout() -> EmulatorLayout {
    EmulatorLayout::from_prefix(Path::new("/data/qemu"))
}

fn machine(arch: Architecture, os: OsFamily) -> MachineConfig {
    let mut config = MachineConfig::new("test", arch, os);
    config.id = "vm-1".to_string();
    config
}

#[test]
fn test_both_x86_variants_select_the_64_bit_x86_emulator() {
    for arch in [Architecture::X86_64, Architecture::X86] {
        // Arrange
        let config = machine(arch, OsFamily::Other);

        // Act
        let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

        // Assert
        assert_eq!(
            cmd.program,
            PathBuf::from("/data/qemu/bin/qemu-system-x86_64"),
            "{arch:?} must use the 64-bit x86 emulator"
        );
        assert_eq!(cmd.value_of("-machine"), Some("pc,accel=tcg"));
        assert_eq!(cmd.value_of("-cpu"), Some("qemu64"));
    }
}

#[test]
fn test_both_arm_variants_select_the_64_bit_arm_emulator() {
    for arch in [Architecture::Aarch64, Architecture::Arm] {
        let config = machine(arch, OsFamily::Linux);

        let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

        assert_eq!(cmd.program, PathBuf::from("/data/qemu/bin/qemu-system-aarch64"));
    }
}

#[test]
fn test_linux_gets_paravirtualized_disk_and_nic() {
    // Arrange
    let config = machine(Architecture::X86_64, OsFamily::Linux);

    // Act
    let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    // Assert
    assert_eq!(
        cmd.value_of("-drive"),
        Some("file=/d/vm.qcow2,format=qcow2,if=virtio")
    );
    assert!(cmd.values_of("-device").any(|d| d == "virtio-net-pci,netdev=net0"));
    assert_eq!(cmd.value_of("-vga"), Some("virtio"));
}

#[test]
fn test_legacy_windows_gets_ide_disk_and_rtl8139() {
    let config = machine(Architecture::X86, OsFamily::LegacyWindows);

    let cmd = build_command_with_probe(&config, Path::new("/d/vm.img"), &layout(), |_| false);

    assert_eq!(
        cmd.value_of("-drive"),
        Some("file=/d/vm.img,format=raw,if=ide,index=0,media=disk")
    );
    assert!(cmd.values_of("-device").any(|d| d == "rtl8139,netdev=net0"));
    assert_eq!(cmd.value_of("-vga"), Some("cirrus"));
}

#[test]
fn test_modern_windows_and_other_get_e1000_and_std_vga() {
    for os in [OsFamily::ModernWindows, OsFamily::Other] {
        let config = machine(Architecture::X86_64, os);

        let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

        assert!(cmd.values_of("-device").any(|d| d == "e1000,netdev=net0"));
        assert_eq!(cmd.value_of("-vga"), Some("std"));
        assert!(cmd.value_of("-drive").is_some_and(|d| d.contains("if=ide")));
    }
}

#[test]
fn test_cpu_count_is_pinned_to_one() {
    let mut config = machine(Architecture::X86_64, OsFamily::Linux);
    config.cpus = 8;
    config.memory_mib = 1536;

    let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    assert_eq!(cmd.value_of("-smp"), Some("1"));
    assert_eq!(cmd.value_of("-m"), Some("1536M"));
}

#[test]
fn test_acpi_flag_only_when_disabled() {
    // Arrange
    let enabled = machine(Architecture::X86_64, OsFamily::Other);
    let mut disabled = enabled.clone();
    disabled.acpi = false;

    // Act
    let with_acpi = build_command_with_probe(&enabled, Path::new("/d/a.img"), &layout(), |_| false);
    let without = build_command_with_probe(&disabled, Path::new("/d/a.img"), &layout(), |_| false);

    // Assert
    assert!(!with_acpi.has_flag("-no-acpi"));
    assert!(without.has_flag("-no-acpi"));
}

#[test]
fn test_missing_boot_media_omits_cdrom_and_keeps_configured_order() {
    // Arrange
    let mut config = machine(Architecture::X86_64, OsFamily::ModernWindows);
    config.boot_media = Some("/nonexistent/win.iso".to_string());
    config.boot_order = BootOrder::DiskThenCd;

    // Act
    let cmd = build_command(&config, Path::new("/d/vm.qcow2"), &layout());

    // Assert
    assert!(!cmd.has_flag("-cdrom"));
    assert_eq!(cmd.value_of("-boot"), Some("order=cd,menu=on"));
}

#[test]
fn test_present_boot_media_attaches_cdrom_and_forces_cd_first() {
    let mut config = machine(Architecture::X86_64, OsFamily::ModernWindows);
    config.boot_media = Some("/isos/win.iso".to_string());
    config.boot_order = BootOrder::DiskThenCd;

    let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |p| {
        p == Path::new("/isos/win.iso")
    });

    assert_eq!(cmd.value_of("-cdrom"), Some("/isos/win.iso"));
    assert_eq!(cmd.value_of("-boot"), Some("order=d,menu=on"));
}

#[test]
fn test_display_clause_uses_port_minus_5900() {
    let mut config = machine(Architecture::X86_64, OsFamily::Linux);
    config.display_port = 5907;

    let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    assert_eq!(cmd.value_of("-vnc"), Some(":7"));
    assert_eq!(cmd.value_of("-display"), Some("none"));
}

#[test]
fn test_usb_tablet_rtc_and_user_network_are_always_present() {
    let config = machine(Architecture::Aarch64, OsFamily::Other);

    let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    assert!(cmd.has_flag("-usb"));
    assert!(cmd.values_of("-device").any(|d| d == "usb-tablet"));
    assert_eq!(cmd.value_of("-rtc"), Some("base=localtime,clock=host"));
    assert_eq!(cmd.value_of("-netdev"), Some("user,id=net0"));
}

#[test]
fn test_acceleration_flag_only_when_requested() {
    let mut config = machine(Architecture::X86_64, OsFamily::Linux);
    let plain = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);
    config.hardware_acceleration = true;
    let accelerated =
        build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    assert!(!plain.has_flag("-enable-kvm"));
    assert!(accelerated.has_flag("-enable-kvm"));
}

#[test]
fn test_explicit_video_adapter_overrides_os_table() {
    let mut config = machine(Architecture::X86_64, OsFamily::Linux);
    config.video = VideoAdapter::Vmware;

    let cmd = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    assert_eq!(cmd.value_of("-vga"), Some("vmware"));
}

#[test]
fn test_output_is_deterministic() {
    let config = machine(Architecture::X86_64, OsFamily::ModernWindows);

    let first = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);
    let second = build_command_with_probe(&config, Path::new("/d/vm.qcow2"), &layout(), |_| false);

    assert_eq!(first, second);
}
