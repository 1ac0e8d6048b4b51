use std::{fmt, str::FromStr};

use crate::error::Error;

/// Environment variable consulted when the config doesn't name a cloud.
pub const AZURE_ENVIRONMENT_VAR: &str = "AZURE_ENVIRONMENT";

/// The Azure clouds the plugin can talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AzureEnvironment {
    #[default]
    PublicCloud,
    UsGovernmentCloud,
    ChinaCloud,
    GermanCloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub resource_manager: &'static str,
    pub active_directory: &'static str,
}

impl Endpoints {
    /// OAuth scope for the resource manager API.
    pub fn resource_manager_scope(&self) -> String {
        format!("{}/.default", self.resource_manager.trim_end_matches('/'))
    }
}

static ENVIRONMENTS: [(AzureEnvironment, &str, Endpoints); 4] = [
    (
        AzureEnvironment::PublicCloud,
        "AzurePublicCloud",
        Endpoints {
            resource_manager: "https://management.azure.com/",
            active_directory: "https://login.microsoftonline.com/",
        },
    ),
    (
        AzureEnvironment::UsGovernmentCloud,
        "AzureUSGovernmentCloud",
        Endpoints {
            resource_manager: "https://management.usgovcloudapi.net/",
            active_directory: "https://login.microsoftonline.us/",
        },
    ),
    (
        AzureEnvironment::ChinaCloud,
        "AzureChinaCloud",
        Endpoints {
            resource_manager: "https://management.chinacloudapi.cn/",
            active_directory: "https://login.chinacloudapi.cn/",
        },
    ),
    (
        AzureEnvironment::GermanCloud,
        "AzureGermanCloud",
        Endpoints {
            resource_manager: "https://management.microsoftazure.de/",
            active_directory: "https://login.microsoftonline.de/",
        },
    ),
];

impl AzureEnvironment {
    fn entry(&self) -> &'static (AzureEnvironment, &'static str, Endpoints) {
        ENVIRONMENTS
            .iter()
            .find(|(env, _, _)| env == self)
            .unwrap_or(&ENVIRONMENTS[0])
    }

    pub fn name(&self) -> &'static str {
        self.entry().1
    }

    pub fn endpoints(&self) -> Endpoints {
        self.entry().2
    }
}

impl FromStr for AzureEnvironment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ENVIRONMENTS
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(env, _, _)| *env)
            .ok_or_else(|| {
                let known: Vec<&str> = ENVIRONMENTS.iter().map(|(_, name, _)| *name).collect();
                Error::config(format!(
                    "unknown Azure environment {s:?}, expected one of {}",
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for AzureEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!(
            "azurepubliccloud".parse::<AzureEnvironment>().unwrap(),
            AzureEnvironment::PublicCloud
        );
        assert_eq!(
            "AzureUSGovernmentCloud".parse::<AzureEnvironment>().unwrap(),
            AzureEnvironment::UsGovernmentCloud
        );
        assert_eq!(
            "AZURECHINACLOUD".parse::<AzureEnvironment>().unwrap(),
            AzureEnvironment::ChinaCloud
        );
        assert!("AzureMoonCloud".parse::<AzureEnvironment>().is_err());
    }

    #[test]
    fn endpoints_and_scope() {
        let endpoints = AzureEnvironment::GermanCloud.endpoints();
        assert_eq!(
            endpoints.resource_manager,
            "https://management.microsoftazure.de/"
        );
        assert_eq!(
            endpoints.resource_manager_scope(),
            "https://management.microsoftazure.de/.default"
        );
        assert_eq!(AzureEnvironment::default().name(), "AzurePublicCloud");
    }
}
