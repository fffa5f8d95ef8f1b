//! Architecture, object format and calling-convention enumerations.
//!
//! Every architecture carries a static [`ArchProfile`] row. The comparator
//! reads the allowed calling conventions from this table, and the driver
//! reads the default timeout from it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Target instruction-set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86", alias = "i386", alias = "i686")]
    X86,
    #[serde(rename = "x86_64", alias = "x86-64", alias = "x64", alias = "amd64")]
    X86_64,
    #[serde(rename = "arm", alias = "ARM", alias = "arm32")]
    Arm,
    #[serde(rename = "arm64", alias = "ARM64", alias = "aarch64")]
    Arm64,
    #[serde(rename = "mips", alias = "MIPS")]
    Mips,
    #[serde(rename = "powerpc", alias = "PowerPC", alias = "ppc")]
    PowerPc,
}

/// Binary container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFormat {
    #[serde(alias = "ELF")]
    Elf,
    #[serde(alias = "PE", alias = "coff")]
    Pe,
    Other,
}

/// Calling conventions the harness knows how to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallingConvention {
    Cdecl,
    Stdcall,
    Fastcall,
    Thiscall,
    #[serde(rename = "sysv")]
    SysV,
    Microsoft,
    Aapcs,
    Aapcs64,
    #[serde(rename = "o32")]
    MipsO32,
    #[serde(rename = "n32")]
    MipsN32,
    #[serde(rename = "n64")]
    MipsN64,
    #[serde(rename = "ppc-sysv")]
    PpcSysV,
    #[serde(rename = "ppc-elfv2")]
    PpcElfV2,
}

/// Static metadata attached to each architecture.
#[derive(Debug)]
pub struct ArchProfile {
    pub architecture: Architecture,
    /// Name used in reports ("ARM", "x86-64", ...).
    pub display_name: &'static str,
    /// Value passed to the collaborator as the architecture hint.
    pub hint: &'static str,
    pub calling_conventions: &'static [CallingConvention],
    pub default_timeout: Duration,
}

const PROFILES: [ArchProfile; 6] = [
    ArchProfile {
        architecture: Architecture::X86,
        display_name: "x86",
        hint: "x86",
        calling_conventions: &[
            CallingConvention::Cdecl,
            CallingConvention::Stdcall,
            CallingConvention::Fastcall,
            CallingConvention::Thiscall,
        ],
        default_timeout: Duration::from_secs(60),
    },
    ArchProfile {
        architecture: Architecture::X86_64,
        display_name: "x86-64",
        hint: "x86_64",
        calling_conventions: &[CallingConvention::SysV, CallingConvention::Microsoft],
        default_timeout: Duration::from_secs(60),
    },
    ArchProfile {
        architecture: Architecture::Arm,
        display_name: "ARM",
        hint: "arm",
        calling_conventions: &[CallingConvention::Aapcs],
        default_timeout: Duration::from_secs(90),
    },
    ArchProfile {
        architecture: Architecture::Arm64,
        display_name: "ARM64",
        hint: "arm64",
        calling_conventions: &[CallingConvention::Aapcs64],
        default_timeout: Duration::from_secs(90),
    },
    ArchProfile {
        architecture: Architecture::Mips,
        display_name: "MIPS",
        hint: "mips",
        calling_conventions: &[
            CallingConvention::MipsO32,
            CallingConvention::MipsN32,
            CallingConvention::MipsN64,
        ],
        default_timeout: Duration::from_secs(120),
    },
    ArchProfile {
        architecture: Architecture::PowerPc,
        display_name: "PowerPC",
        hint: "powerpc",
        calling_conventions: &[CallingConvention::PpcSysV, CallingConvention::PpcElfV2],
        default_timeout: Duration::from_secs(120),
    },
];

impl Architecture {
    /// All architectures, in report order.
    pub const ALL: [Architecture; 6] = [
        Architecture::X86,
        Architecture::X86_64,
        Architecture::Arm,
        Architecture::Arm64,
        Architecture::Mips,
        Architecture::PowerPc,
    ];

    pub fn profile(self) -> &'static ArchProfile {
        let profile = &PROFILES[self as usize];
        debug_assert_eq!(profile.architecture, self);
        profile
    }

    pub fn display_name(self) -> &'static str {
        self.profile().display_name
    }

    pub fn hint(self) -> &'static str {
        self.profile().hint
    }

    /// Whether `convention` belongs to this architecture's fixed set.
    pub fn supports(self, convention: CallingConvention) -> bool {
        self.profile().calling_conventions.contains(&convention)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Error returned when parsing an enumeration from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Architecture {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "x8664" | "x64" | "amd64" => Ok(Architecture::X86_64),
            "arm" | "arm32" => Ok(Architecture::Arm),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "mips" => Ok(Architecture::Mips),
            "powerpc" | "ppc" => Ok(Architecture::PowerPc),
            _ => Err(ParseEnumError {
                kind: "architecture",
                value: s.to_string(),
            }),
        }
    }
}

impl ObjectFormat {
    pub const ALL: [ObjectFormat; 3] = [ObjectFormat::Elf, ObjectFormat::Pe, ObjectFormat::Other];

    pub fn display_name(self) -> &'static str {
        match self {
            ObjectFormat::Elf => "ELF",
            ObjectFormat::Pe => "PE",
            ObjectFormat::Other => "other",
        }
    }

    /// Value passed to the collaborator as the format hint.
    pub fn hint(self) -> &'static str {
        match self {
            ObjectFormat::Elf => "elf",
            ObjectFormat::Pe => "pe",
            ObjectFormat::Other => "other",
        }
    }
}

impl fmt::Display for ObjectFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ObjectFormat {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "elf" => Ok(ObjectFormat::Elf),
            "pe" | "coff" => Ok(ObjectFormat::Pe),
            "other" => Ok(ObjectFormat::Other),
            _ => Err(ParseEnumError {
                kind: "object format",
                value: s.to_string(),
            }),
        }
    }
}

impl CallingConvention {
    /// Canonical identifier, identical to the serde name.
    pub fn as_str(self) -> &'static str {
        match self {
            CallingConvention::Cdecl => "cdecl",
            CallingConvention::Stdcall => "stdcall",
            CallingConvention::Fastcall => "fastcall",
            CallingConvention::Thiscall => "thiscall",
            CallingConvention::SysV => "sysv",
            CallingConvention::Microsoft => "microsoft",
            CallingConvention::Aapcs => "aapcs",
            CallingConvention::Aapcs64 => "aapcs64",
            CallingConvention::MipsO32 => "o32",
            CallingConvention::MipsN32 => "n32",
            CallingConvention::MipsN64 => "n64",
            CallingConvention::PpcSysV => "ppc-sysv",
            CallingConvention::PpcElfV2 => "ppc-elfv2",
        }
    }

    /// Parse a convention name as reported by a decompiler.
    ///
    /// Matching ignores case, whitespace, `-` and `_`, and accepts the
    /// spellings commonly emitted by decompilers and compilers.
    pub fn parse_observed(raw: &str) -> Option<Self> {
        let key = normalize(raw);
        let convention = match key.as_str() {
            "cdecl" | "ccall" => CallingConvention::Cdecl,
            "stdcall" | "winapi" => CallingConvention::Stdcall,
            "fastcall" | "msfastcall" => CallingConvention::Fastcall,
            "thiscall" => CallingConvention::Thiscall,
            "sysv" | "systemv" | "systemvamd64" | "sysvabi" | "amd64sysv" => {
                CallingConvention::SysV
            }
            "microsoft" | "microsoftx64" | "msx64" | "win64" | "msabi" => {
                CallingConvention::Microsoft
            }
            "aapcs" | "aapcsvfp" => CallingConvention::Aapcs,
            "aapcs64" | "aarch64" => CallingConvention::Aapcs64,
            "o32" | "mipso32" => CallingConvention::MipsO32,
            "n32" | "mipsn32" => CallingConvention::MipsN32,
            "n64" | "mipsn64" => CallingConvention::MipsN64,
            "ppcsysv" | "powerpcsysv" | "ppc32sysv" | "elfv1" | "ppc64elfv1" => {
                CallingConvention::PpcSysV
            }
            "ppcelfv2" | "elfv2" | "ppc64elfv2" => CallingConvention::PpcElfV2,
            _ => return None,
        };
        Some(convention)
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}
