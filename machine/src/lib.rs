//! Abstractions for dealing with the UEFI firmware an x86_64 application
//! runs on before an operating system is loaded

#![cfg_attr(not(test), no_std)]

pub mod uefi;
pub mod pci_io;
