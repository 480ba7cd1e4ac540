//! Parsed representation of a `quick-lint-js.config` file
//!
//! The file is strict JSON with two recognized keys:
//!
//! ```json
//! {
//!   "global-groups": ["ecmascript", "node"],
//!   "globals": {
//!     "gadget": true,
//!     "console": false,
//!     "jQuery": {"shadowable": false, "writable": false}
//!   }
//! }
//! ```
//!
//! `global-groups` may also be a bare boolean: `true` enables every default
//! group, `false` disables all of them. A global declared `false` is removed
//! even if a group provides it. Unknown keys are ignored.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Default global groups and their member variables.
const DEFAULT_GLOBAL_GROUPS: &[(&str, &[&str])] = &[
    (
        "ecmascript",
        &[
            "globalThis",
            "Infinity",
            "NaN",
            "undefined",
            "Array",
            "Object",
            "Promise",
            "Symbol",
        ],
    ),
    (
        "web",
        &[
            "console",
            "document",
            "fetch",
            "navigator",
            "setTimeout",
            "window",
        ],
    ),
    (
        "node",
        &[
            "console",
            "module",
            "process",
            "require",
            "__dirname",
            "__filename",
        ],
    ),
];

/// Properties of one declared global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDeclaration {
    pub shadowable: bool,
    pub writable: bool,
}

impl Default for GlobalDeclaration {
    fn default() -> Self {
        Self {
            shadowable: true,
            writable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobalSetting {
    Declared(GlobalDeclaration),
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobalGroups {
    All,
    None,
    Selected(Vec<String>),
}

/// A parsed configuration.
///
/// The default configuration enables every default global group, so for
/// example `console` is known even when no config file applies.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    globals: BTreeMap<String, GlobalSetting>,
    global_groups: GlobalGroups,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            globals: BTreeMap::new(),
            global_groups: GlobalGroups::All,
        }
    }
}

impl Configuration {
    /// Parse raw config file bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let schema: ConfigSchema = serde_json::from_slice(bytes)?;

        let global_groups = match schema.global_groups {
            None | Some(GlobalGroupsSchema::Toggle(true)) => GlobalGroups::All,
            Some(GlobalGroupsSchema::Toggle(false)) => GlobalGroups::None,
            Some(GlobalGroupsSchema::List(names)) => GlobalGroups::Selected(names),
        };

        let globals = schema
            .globals
            .into_iter()
            .map(|(name, setting)| {
                let setting = match setting {
                    GlobalSchema::Present(true) => {
                        GlobalSetting::Declared(GlobalDeclaration::default())
                    }
                    GlobalSchema::Present(false) => GlobalSetting::Removed,
                    GlobalSchema::Declaration {
                        shadowable,
                        writable,
                    } => GlobalSetting::Declared(GlobalDeclaration {
                        shadowable,
                        writable,
                    }),
                };
                (name, setting)
            })
            .collect();

        Ok(Self {
            globals,
            global_groups,
        })
    }

    /// Look up a global variable by name. Returns `None` when the name is
    /// not a known global, including when a config declares it `false`.
    pub fn global(&self, name: &str) -> Option<GlobalDeclaration> {
        match self.globals.get(name) {
            Some(GlobalSetting::Declared(declaration)) => return Some(*declaration),
            Some(GlobalSetting::Removed) => return None,
            None => {}
        }
        if self.group_provides(name) {
            Some(GlobalDeclaration::default())
        } else {
            None
        }
    }

    fn group_provides(&self, name: &str) -> bool {
        let group_enabled = |group: &str| match &self.global_groups {
            GlobalGroups::All => true,
            GlobalGroups::None => false,
            GlobalGroups::Selected(selected) => selected.iter().any(|s| s == group),
        };
        DEFAULT_GLOBAL_GROUPS
            .iter()
            .any(|&(group, members)| group_enabled(group) && members.contains(&name))
    }
}

#[derive(Deserialize)]
struct ConfigSchema {
    #[serde(default, rename = "global-groups")]
    global_groups: Option<GlobalGroupsSchema>,
    #[serde(default)]
    globals: BTreeMap<String, GlobalSchema>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GlobalGroupsSchema {
    Toggle(bool),
    List(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GlobalSchema {
    Present(bool),
    Declaration {
        #[serde(default = "default_true")]
        shadowable: bool,
        #[serde(default = "default_true")]
        writable: bool,
    },
}

fn default_true() -> bool {
    true
}
