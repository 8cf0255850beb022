pub mod blkid;
pub mod dependencies;
pub mod fdisk;
pub mod files;
pub mod lock;
pub mod lspci;
pub mod mkfs;
pub mod mount;
pub mod mountpoint;
pub mod sysfs;
pub mod tabfile;
pub mod udevadm;
