pub mod bootloader;
pub mod drivers;
pub mod locale;
pub mod network;
pub mod packages;
pub mod secureboot;
pub mod services;
pub mod storage;
pub mod users;
