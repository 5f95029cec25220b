//! Compiler configuration.
//!
//! [`CompilerConfig`] collects everything the pipeline needs to know up
//! front: the code generation target, assembly dialect, optimization
//! toggles, and debug-info emission. The CLI builds one from flags; a
//! TOML profile file can set the same knobs for a whole project.
//!
//! # Example profile
//!
//! ```toml
//! target = "x86_64"
//! syntax = "att"
//! debug-info = true
//!
//! [optimize]
//! const-prop = true
//! inline = false
//! ```

use crate::emit::AsmSyntax;
use crate::opt::OptFlags;
use crate::types::Target;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub target: Target,
    pub syntax: AsmSyntax,
    pub opt: OptFlags,
    /// Emit `.file`/`.loc` directives
    pub debug_info: bool,
    /// Mark externally visible functions with `.globl`
    pub export_symbols: bool,
    /// Struct-pack alignment; 0 means natural layout
    pub pack: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            target: Target { x86_64: true },
            syntax: AsmSyntax::Att,
            opt: OptFlags::default(),
            debug_info: false,
            export_symbols: true,
            pack: 0,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_target(mut self, x86_64: bool) -> Self {
        self.target = Target { x86_64 };
        self
    }

    pub fn with_syntax(mut self, syntax: AsmSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_opt(mut self, opt: OptFlags) -> Self {
        self.opt = opt;
        self
    }

    pub fn with_debug_info(mut self, debug_info: bool) -> Self {
        self.debug_info = debug_info;
        self
    }

    pub fn with_pack(mut self, pack: u64) -> Self {
        self.pack = pack;
        self
    }

    /// Parse a TOML profile and overlay it on the defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        let profile: Profile =
            toml::from_str(toml_str).map_err(|e| format!("failed to parse profile: {}", e))?;
        let mut config = CompilerConfig::default();

        if let Some(target) = profile.target {
            config.target = match target.as_str() {
                "x86_64" | "x86-64" | "amd64" => Target { x86_64: true },
                "i386" | "x86" | "i686" => Target { x86_64: false },
                other => return Err(format!("unknown target '{}'", other)),
            };
        }
        if let Some(syntax) = profile.syntax {
            config.syntax = match syntax.as_str() {
                "att" => AsmSyntax::Att,
                "intel" => AsmSyntax::Intel,
                other => return Err(format!("unknown syntax '{}'", other)),
            };
        }
        if let Some(opt) = profile.optimize {
            let defaults = OptFlags::default();
            config.opt = OptFlags {
                const_prop: opt.const_prop.unwrap_or(defaults.const_prop),
                inline: opt.inline.unwrap_or(defaults.inline),
                fold: opt.fold.unwrap_or(defaults.fold),
                dce: opt.dce.unwrap_or(defaults.dce),
            };
        }
        if let Some(debug_info) = profile.debug_info {
            config.debug_info = debug_info;
        }
        if let Some(pack) = profile.pack {
            if pack != 0 && !pack.is_power_of_two() {
                return Err(format!("pack alignment {} is not a power of two", pack));
            }
            config.pack = pack;
        }
        Ok(config)
    }
}

/// On-disk profile shape; every field optional.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Profile {
    target: Option<String>,
    syntax: Option<String>,
    optimize: Option<ProfileOpt>,
    #[serde(rename = "debug-info")]
    debug_info: Option<bool>,
    pack: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileOpt {
    #[serde(rename = "const-prop")]
    const_prop: Option<bool>,
    inline: Option<bool>,
    fold: Option<bool>,
    dce: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_overlays_defaults() {
        let config = CompilerConfig::from_toml(
            "target = \"i386\"\nsyntax = \"intel\"\n\n[optimize]\ninline = false\n",
        )
        .unwrap();
        assert!(!config.target.x86_64);
        assert_eq!(config.syntax, AsmSyntax::Intel);
        assert!(!config.opt.inline);
        assert!(config.opt.fold, "unset flags keep their defaults");
    }

    #[test]
    fn test_bad_target_is_rejected() {
        assert!(CompilerConfig::from_toml("target = \"sparc\"").is_err());
    }

    #[test]
    fn test_bad_pack_is_rejected() {
        assert!(CompilerConfig::from_toml("pack = 3").is_err());
        assert!(CompilerConfig::from_toml("pack = 4").is_ok());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(CompilerConfig::from_toml("tarket = \"i386\"").is_err());
    }
}
