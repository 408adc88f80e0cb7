//! Attribute reporting templates.

use crate::radio::{Cluster, EndpointInfo, ReportingConfig};

/// `colorCapabilities` bit: CIE xy supported.
pub const COLOR_CAP_XY: u16 = 0x08;

/// `colorCapabilities` bit: colour temperature supported.
pub const COLOR_CAP_TEMPERATURE: u16 = 0x10;

/// Used when the capabilities cannot be read: every colour light does xy.
pub const COLOR_CAP_FALLBACK: u16 = COLOR_CAP_XY;

/// Clusters bound when a request names none, in bind order.
pub fn canonical_bind_clusters() -> Vec<Cluster> {
    vec![
        Cluster::Scenes,
        Cluster::OnOff,
        Cluster::LevelCtrl,
        Cluster::ColorCtrl,
    ]
}

/// Whether binding this cluster also configures reporting on the target.
pub fn has_reporting(cluster: &Cluster) -> bool {
    matches!(cluster, Cluster::OnOff | Cluster::LevelCtrl | Cluster::ColorCtrl)
}

/// Reporting entries for a cluster. Colour entries depend on the
/// capabilities of the target endpoint.
pub fn templates(cluster: &Cluster, color_capabilities: Option<u16>) -> Vec<ReportingConfig> {
    match cluster {
        Cluster::OnOff => vec![ReportingConfig::new("onOff", 0, 3600, 0)],
        Cluster::LevelCtrl => vec![ReportingConfig::new("currentLevel", 5, 3600, 1)],
        Cluster::ColorCtrl => {
            let caps = color_capabilities.unwrap_or(COLOR_CAP_FALLBACK);
            let mut items = Vec::new();
            if caps & COLOR_CAP_TEMPERATURE != 0 {
                items.push(ReportingConfig::new("colorTemperature", 5, 3600, 1));
            }
            if caps & COLOR_CAP_XY != 0 {
                items.push(ReportingConfig::new("currentX", 5, 3600, 1));
                items.push(ReportingConfig::new("currentY", 5, 3600, 1));
            }
            items
        }
        _ => Vec::new(),
    }
}

/// Drop entries the endpoint already reports at an equal or tighter
/// setting.
pub fn without_redundant(
    endpoint: &EndpointInfo,
    cluster: &Cluster,
    items: Vec<ReportingConfig>,
) -> Vec<ReportingConfig> {
    items
        .into_iter()
        .filter(|item| match endpoint.reporting(cluster, &item.attribute) {
            Some(existing) if !existing.is_disabled() => {
                !(existing.min_interval <= item.min_interval
                    && existing.max_interval <= item.max_interval
                    && existing.reportable_change <= item.reportable_change)
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::ConfiguredReporting;

    #[test]
    fn test_color_templates_follow_capabilities() {
        let both = templates(&Cluster::ColorCtrl, Some(COLOR_CAP_XY | COLOR_CAP_TEMPERATURE));
        let attrs: Vec<_> = both.iter().map(|c| c.attribute.as_str()).collect();
        assert_eq!(attrs, vec!["colorTemperature", "currentX", "currentY"]);

        let temp_only = templates(&Cluster::ColorCtrl, Some(COLOR_CAP_TEMPERATURE));
        assert_eq!(temp_only.len(), 1);

        assert!(templates(&Cluster::Scenes, None).is_empty());
        assert_eq!(
            templates(&Cluster::LevelCtrl, None),
            vec![ReportingConfig::new("currentLevel", 5, 3600, 1)]
        );
    }

    #[test]
    fn test_tighter_existing_reporting_is_kept() {
        let mut endpoint = EndpointInfo::new(1);
        endpoint.configured_reportings.push(ConfiguredReporting {
            cluster: Cluster::LevelCtrl,
            config: ReportingConfig::new("currentLevel", 1, 600, 1),
        });
        let items = templates(&Cluster::LevelCtrl, None);
        assert!(without_redundant(&endpoint, &Cluster::LevelCtrl, items).is_empty());

        endpoint.configured_reportings[0].config =
            ReportingConfig::new("currentLevel", 1, 600, 1).disabled();
        let items = templates(&Cluster::LevelCtrl, None);
        assert_eq!(without_redundant(&endpoint, &Cluster::LevelCtrl, items).len(), 1);
    }
}
