pub mod arch;
pub mod chroot;
pub mod cmdline;
pub mod dependencies;
pub mod files;
pub mod grub;
pub mod netdev;
pub mod path;
pub mod systemd;
pub mod tabfile;
pub mod virt;
