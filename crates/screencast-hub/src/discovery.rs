//! mDNS discovery for cast receivers.
//!
//! Decodes `_googlecast._tcp` advertisements into `NewDevice` events. This layer
//! never de-duplicates: every fully resolvable advertisement is forwarded and the
//! correlation layer decides whether the host is new.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc;

pub(crate) const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// A playback device resolved from one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewDevice {
    pub host: String,
    pub friendly_name: Option<String>,
}

/// One TXT record as parsed key/value properties.
pub(crate) type TxtBlock = Vec<(String, String)>;

/// Raw advertisement fields needed to resolve a device.
#[derive(Debug, Clone, Default)]
pub(crate) struct Advertisement {
    pub fullname: String,
    pub addresses: Vec<Ipv4Addr>,
    /// SRV target hostname.
    pub srv_target: Option<String>,
    /// TXT records in arrival order.
    pub txt: Vec<TxtBlock>,
}

/// Merge TXT records key by key; later records win. `None` when there is no metadata.
pub(crate) fn merge_txt(blocks: &[TxtBlock]) -> Option<HashMap<&str, &str>> {
    let merged: HashMap<&str, &str> = blocks
        .iter()
        .flatten()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    (!merged.is_empty()).then_some(merged)
}

/// Resolve an advertisement into a device, or `None` when it is incomplete.
pub(crate) fn decode_advertisement(ad: &Advertisement) -> Option<NewDevice> {
    if !ad
        .fullname
        .trim_end_matches('.')
        .to_ascii_lowercase()
        .ends_with(CAST_SERVICE_TYPE.trim_end_matches('.'))
    {
        return None;
    }
    let fields = merge_txt(&ad.txt)?;
    let host = ad
        .addresses
        .first()
        .map(|ip| ip.to_string())
        .or_else(|| {
            ad.srv_target
                .as_deref()
                .map(|target| target.trim_end_matches('.').to_string())
                .filter(|target| !target.is_empty())
        })?;
    let friendly_name = fields
        .get("fn")
        .or_else(|| fields.get("n"))
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string());
    Some(NewDevice {
        host,
        friendly_name,
    })
}

fn advertisement_from_resolved(info: &mdns_sd::ResolvedService) -> Advertisement {
    let txt: TxtBlock = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();
    let addresses = info
        .get_addresses()
        .iter()
        .filter_map(|ip| match ip {
            mdns_sd::ScopedIp::V4(v4) => Some(*v4.addr()),
            _ => None,
        })
        .collect();
    Advertisement {
        fullname: info.get_fullname().to_string(),
        addresses,
        srv_target: Some(info.get_hostname().to_string()),
        txt: vec![txt],
    }
}

/// Handle to the mDNS browser. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Discovery {
    daemon: ServiceDaemon,
    events: mpsc::UnboundedSender<NewDevice>,
}

impl Discovery {
    /// Start the mDNS daemon, optionally restricted to one interface address.
    pub(crate) fn new(
        interface: Option<IpAddr>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<NewDevice>)> {
        let daemon = ServiceDaemon::new()?;
        if let Some(ip) = interface {
            daemon.disable_interface(IfKind::All)?;
            daemon.enable_interface(IfKind::Addr(ip))?;
            tracing::info!(interface = %ip, "mdns: restricted to interface");
        }
        let (events, rx) = mpsc::unbounded_channel();
        Ok((Self { daemon, events }, rx))
    }

    /// Broadcast a fresh query for cast receivers.
    ///
    /// Results keep arriving until the next call replaces this browse.
    pub(crate) fn start_lookup(&self) {
        let _ = self.daemon.stop_browse(CAST_SERVICE_TYPE);
        let receiver = match self.daemon.browse(CAST_SERVICE_TYPE) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "mdns: browse failed");
                return;
            }
        };
        tracing::info!("mdns: looking for cast devices");
        let events = self.events.clone();
        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let ad = advertisement_from_resolved(&info);
                        let Some(device) = decode_advertisement(&ad) else {
                            tracing::debug!(fullname = %ad.fullname, "mdns: incomplete advertisement dropped");
                            continue;
                        };
                        tracing::debug!(
                            host = %device.host,
                            name = ?device.friendly_name,
                            "mdns: cast device resolved"
                        );
                        if events.send(device).is_err() {
                            break;
                        }
                    }
                    ServiceEvent::SearchStopped(_) => break,
                    _ => {}
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(entries: &[(&str, &str)]) -> TxtBlock {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn advertisement(txt: Vec<TxtBlock>) -> Advertisement {
        Advertisement {
            fullname: "Chromecast-abc._googlecast._tcp.local.".to_string(),
            addresses: vec![Ipv4Addr::new(10, 0, 0, 5)],
            srv_target: Some("abc.local.".to_string()),
            txt,
        }
    }

    #[test]
    fn merges_records_with_later_records_winning() {
        let blocks = vec![
            block(&[("n", "Old"), ("md", "Chromecast")]),
            block(&[("n", "New"), ("rs", "")]),
        ];
        let fields = merge_txt(&blocks).unwrap();
        assert_eq!(fields["n"], "New");
        assert_eq!(fields["md"], "Chromecast");
        assert_eq!(fields["rs"], "");
    }

    #[test]
    fn empty_metadata_is_not_decodable() {
        assert!(merge_txt(&[]).is_none());
        assert!(merge_txt(&[block(&[]), block(&[("", "x")])]).is_none());
    }

    #[test]
    fn prefers_friendly_name_over_name() {
        let ad = advertisement(vec![block(&[("n", "Generic"), ("fn", "Büro")])]);
        let device = decode_advertisement(&ad).unwrap();
        assert_eq!(device.host, "10.0.0.5");
        assert_eq!(device.friendly_name.as_deref(), Some("Büro"));

        let ad = advertisement(vec![block(&[("n", "Generic")])]);
        assert_eq!(
            decode_advertisement(&ad).unwrap().friendly_name.as_deref(),
            Some("Generic")
        );

        let ad = advertisement(vec![block(&[("fn", "Hall")]), block(&[("n", "Later")])]);
        assert_eq!(
            decode_advertisement(&ad).unwrap().friendly_name.as_deref(),
            Some("Hall")
        );
    }

    #[test]
    fn falls_back_to_srv_target_without_address() {
        let mut ad = advertisement(vec![block(&[("fn", "Hall")])]);
        ad.addresses.clear();
        assert_eq!(decode_advertisement(&ad).unwrap().host, "abc.local");
    }

    #[test]
    fn drops_incomplete_advertisements() {
        assert!(decode_advertisement(&advertisement(Vec::new())).is_none());

        let mut no_host = advertisement(vec![block(&[("fn", "Hall")])]);
        no_host.addresses.clear();
        no_host.srv_target = None;
        assert!(decode_advertisement(&no_host).is_none());

        let mut other = advertisement(vec![block(&[("fn", "Hall")])]);
        other.fullname = "printer._ipp._tcp.local.".to_string();
        assert!(decode_advertisement(&other).is_none());
    }

    #[test]
    fn repeated_advertisements_are_passed_through() {
        let ad = advertisement(vec![block(&[("fn", "Kitchen")])]);
        assert_eq!(decode_advertisement(&ad), decode_advertisement(&ad));
    }
}
