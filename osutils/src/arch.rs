use std::path::Path;

/// System architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemArchitecture {
    /// 32-bit x86
    X86,

    /// 64-bit x86
    Amd64,

    /// 32-bit ARM
    Arm,

    /// Other
    Other,
}

const EFI_FIRMWARE_DIR: &str = "/sys/firmware/efi";

impl SystemArchitecture {
    /// Get the current system architecture
    pub fn current() -> Self {
        if cfg!(target_arch = "x86") {
            SystemArchitecture::X86
        } else if cfg!(target_arch = "x86_64") {
            SystemArchitecture::Amd64
        } else if cfg!(target_arch = "arm") {
            SystemArchitecture::Arm
        } else {
            SystemArchitecture::Other
        }
    }

    /// Architecture name used by Entropy repositories.
    pub fn entropy_name(&self) -> &'static str {
        match self {
            SystemArchitecture::X86 => "x86",
            SystemArchitecture::Amd64 => "amd64",
            SystemArchitecture::Arm => "arm",
            SystemArchitecture::Other => "unknown",
        }
    }
}

impl From<&str> for SystemArchitecture {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "x86" | "i386" | "i686" => SystemArchitecture::X86,
            "x64" | "amd64" | "x86_64" => SystemArchitecture::Amd64,
            "arm" | "armv7l" => SystemArchitecture::Arm,
            _ => SystemArchitecture::Other,
        }
    }
}

/// Whether the live system was booted through UEFI firmware.
pub fn is_efi() -> bool {
    Path::new(EFI_FIRMWARE_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(SystemArchitecture::from("x86_64"), SystemArchitecture::Amd64);
        assert_eq!(SystemArchitecture::from("i686"), SystemArchitecture::X86);
        assert_eq!(SystemArchitecture::from("ARMv7l"), SystemArchitecture::Arm);
        assert_eq!(SystemArchitecture::from("riscv64"), SystemArchitecture::Other);
        assert_eq!(SystemArchitecture::Amd64.entropy_name(), "amd64");
    }
}
