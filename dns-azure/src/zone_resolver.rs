//! Mapping of validation names to the Azure DNS zone and record that hosts them.

use tracing::debug;

use crate::{
    error::{Error, Result},
    resource_id::ResourceId,
};

/// Configured `domain -> resource id` pairs, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMapping {
    entries: Vec<(String, String)>,
}

impl ZoneMapping {
    /// Build a mapping, rejecting duplicated domains.
    pub fn new<I, D, R>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (D, R)>,
        D: Into<String>,
        R: Into<String>,
    {
        let mut mapping = Self::default();
        for (domain, resource_id) in entries {
            let domain = domain.into();
            if mapping.get(&domain).is_some() {
                return Err(Error::config(format!(
                    "duplicate zone mapping for domain {domain}"
                )));
            }
            mapping.entries.push((domain, resource_id.into()));
        }
        Ok(mapping)
    }

    pub fn get(&self, domain: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(_, r)| r.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(d, r)| (d.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse every resource id up front.
    pub fn validate(&self) -> Result<()> {
        for (domain, resource_id) in self.iter() {
            parse_for_domain(domain, resource_id)?;
        }
        Ok(())
    }

    /// Find the record that should hold the validation value for `domain`.
    ///
    /// The longest configured domain that `domain` ends with wins, so
    /// `test.example.com` takes precedence over `example.com` regardless of the
    /// configuration order. The match is a plain string suffix match.
    pub fn resolve(&self, domain: &str, validation_name: &str) -> Result<ResolvedTarget> {
        let mut candidates: Vec<&(String, String)> = self.entries.iter().collect();
        candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let (matched, resource_id) = candidates
            .into_iter()
            .find(|(suffix, _)| domain.ends_with(suffix.as_str()))
            .ok_or_else(|| Error::config(format!("no zone mapping for domain {domain}")))?;

        let resource = parse_for_domain(domain, resource_id)?;
        let subscription_id = resource.subscription_id().ok_or_else(|| {
            Error::config(format!(
                "resource id for {domain} has no subscription: {resource_id}"
            ))
        })?;
        let resource_group = resource.resource_group().ok_or_else(|| {
            Error::config(format!(
                "resource id for {domain} has no resource group: {resource_id}"
            ))
        })?;

        let zone = resource.dns_zone().unwrap_or(matched.as_str());
        let (relative_record_name, deletable) = match resource.txt_record() {
            Some(record) => (record.to_string(), false),
            None => (relative_name(validation_name, zone), true),
        };
        debug!(
            domain,
            matched = matched.as_str(),
            zone,
            record = relative_record_name.as_str(),
            "resolved zone mapping"
        );
        Ok(ResolvedTarget {
            domain: domain.to_string(),
            zone: zone.to_string(),
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            relative_record_name,
            deletable,
        })
    }
}

fn parse_for_domain(domain: &str, resource_id: &str) -> Result<ResourceId> {
    ResourceId::parse(resource_id).map_err(|_| {
        Error::config(format!(
            "invalid resource id for {domain}: {resource_id}"
        ))
    })
}

/// Name of `fqdn` relative to `zone`, `@` for the apex.
fn relative_name(fqdn: &str, zone: &str) -> String {
    let fqdn = fqdn.strip_suffix('.').unwrap_or(fqdn);
    if fqdn == zone {
        return "@".into();
    }
    fqdn.strip_suffix(zone)
        .unwrap_or(fqdn)
        .trim_matches('.')
        .to_string()
}

/// Where a validation value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// The domain being validated, for diagnostics.
    pub domain: String,
    pub zone: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub relative_record_name: String,
    /// False when the record is pinned by the configuration. Such records are
    /// blanked on cleanup instead of deleted.
    pub deletable: bool,
}

impl ResolvedTarget {
    /// `name.zone`, used in logs and errors.
    pub fn record_display(&self) -> String {
        if self.relative_record_name == "@" {
            self.zone.clone()
        } else {
            format!("{}.{}", self.relative_record_name, self.zone)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: &str = "/subscriptions/c135abce-d87d-48df-936c-15596c6968a5";

    fn mapping(entries: &[(&str, &str)]) -> ZoneMapping {
        ZoneMapping::new(
            entries
                .iter()
                .map(|(d, r)| (d.to_string(), format!("{SUB}{r}"))),
        )
        .unwrap()
    }

    #[test]
    fn resolves_plain_zone() {
        let m = mapping(&[("example.com", "/resourceGroups/dns1")]);
        let target = m
            .resolve("example.com", "_acme-challenge.example.com")
            .unwrap();
        assert_eq!(
            target,
            ResolvedTarget {
                domain: "example.com".into(),
                zone: "example.com".into(),
                subscription_id: "c135abce-d87d-48df-936c-15596c6968a5".into(),
                resource_group: "dns1".into(),
                relative_record_name: "_acme-challenge".into(),
                deletable: true,
            }
        );
        assert_eq!(target.record_display(), "_acme-challenge.example.com");
    }

    #[test]
    fn longest_suffix_wins_regardless_of_order() {
        for entries in [
            [
                ("example.com", "/resourceGroups/short"),
                ("test.example.com", "/resourceGroups/long"),
            ],
            [
                ("test.example.com", "/resourceGroups/long"),
                ("example.com", "/resourceGroups/short"),
            ],
        ] {
            let m = mapping(&entries);
            let target = m
                .resolve("a.test.example.com", "_acme-challenge.a.test.example.com")
                .unwrap();
            assert_eq!(target.resource_group, "long");
            assert_eq!(target.zone, "test.example.com");
            assert_eq!(target.relative_record_name, "_acme-challenge.a");

            let target = m
                .resolve("other.example.com", "_acme-challenge.other.example.com")
                .unwrap();
            assert_eq!(target.resource_group, "short");
            assert_eq!(target.relative_record_name, "_acme-challenge.other");
        }
    }

    #[test]
    fn unmatched_domain_is_configuration_error() {
        let m = mapping(&[("example.com", "/resourceGroups/dns1")]);
        let err = m
            .resolve("example.org", "_acme-challenge.example.org")
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("example.org"));
    }

    #[test]
    fn empty_mapping_never_resolves() {
        let err = ZoneMapping::default()
            .resolve("example.com", "_acme-challenge.example.com")
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn suffix_match_is_not_label_aware() {
        let m = mapping(&[("ple.com", "/resourceGroups/dns1")]);
        let target = m
            .resolve("example.com", "_acme-challenge.example.com")
            .unwrap();
        assert_eq!(target.zone, "ple.com");
        assert_eq!(target.relative_record_name, "_acme-challenge.exam");
    }

    #[test]
    fn zone_override_keeps_full_name() {
        let m = mapping(&[(
            "test.foo.com",
            "/resourceGroups/dns1/providers/Microsoft.Network/dnsZones/bar.com",
        )]);
        let target = m
            .resolve("test.foo.com", "_acme-challenge.test.foo.com")
            .unwrap();
        assert_eq!(target.zone, "bar.com");
        assert_eq!(target.relative_record_name, "_acme-challenge.test.foo.com");
        assert!(target.deletable);
    }

    #[test]
    fn record_override_is_not_deletable() {
        let m = mapping(&[(
            "test.foo.com",
            "/resourceGroups/dns1/providers/Microsoft.Network/dnszones/bar.com/TXT/test_validation",
        )]);
        let target = m
            .resolve("test.foo.com", "_acme-challenge.test.foo.com")
            .unwrap();
        assert_eq!(target.zone, "bar.com");
        assert_eq!(target.relative_record_name, "test_validation");
        assert!(!target.deletable);
    }

    #[test]
    fn record_override_without_zone_override() {
        let m = mapping(&[(
            "test.foo.com",
            "/resourceGroups/dns1/TXT/_acme-challenge.test",
        )]);
        let target = m
            .resolve("test.foo.com", "_acme-challenge.test.foo.com")
            .unwrap();
        assert_eq!(target.zone, "test.foo.com");
        assert_eq!(target.relative_record_name, "_acme-challenge.test");
        assert!(!target.deletable);
    }

    #[test]
    fn apex_validation_name() {
        let m = mapping(&[("_acme-challenge.example.com", "/resourceGroups/dns1")]);
        let target = m
            .resolve(
                "_acme-challenge.example.com",
                "_acme-challenge.example.com.",
            )
            .unwrap();
        assert_eq!(target.relative_record_name, "@");
        assert_eq!(target.record_display(), "_acme-challenge.example.com");
    }

    #[test]
    fn malformed_resource_id_is_configuration_error() {
        let m = ZoneMapping::new([("example.com", "/subscriptions/s/resourceGroups")]).unwrap();
        let err = m
            .resolve("example.com", "_acme-challenge.example.com")
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "configuration error: invalid resource id for example.com: /subscriptions/s/resourceGroups"
        );
        assert!(m.validate().is_err());
    }

    #[test]
    fn missing_resource_group_is_configuration_error() {
        let m = ZoneMapping::new([("example.com", "/subscriptions/s")]).unwrap();
        let err = m
            .resolve("example.com", "_acme-challenge.example.com")
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn duplicate_domains_are_rejected() {
        let err = ZoneMapping::new([("example.com", "/a/b"), ("example.com", "/c/d")]).unwrap_err();
        assert!(err.is_configuration());
    }
}
