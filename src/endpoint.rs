/// Endpoint registry
/// Immutable definitions of the lines/trunks checks use, built once from
/// the `links` configuration table.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{LinkConfig, DEFAULT_KEY};
use crate::error::TestError;
use crate::lock::Lockable;

/// Placeholder for the dialed number inside a dial template
pub const NUMBER_PLACEHOLDER: &str = "{nr}";

/// One addressable line or trunk
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    /// Dial template, e.g. `SIP/trunk/{nr}`; absent for answer-only links
    pub channel: Option<String>,
    /// Directory number of this line
    pub number: Option<String>,
    pub prio: i32,
    lock: Arc<Mutex<()>>,
}

impl Endpoint {
    pub fn new(name: &str, channel: Option<String>, number: Option<String>, prio: i32) -> Self {
        Self {
            name: name.to_string(),
            channel,
            number,
            prio,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Format the dial string for calling `number` through this endpoint
    pub fn dial_string(&self, number: &str) -> Result<String, TestError> {
        let template = self.channel.as_deref().ok_or_else(|| {
            TestError::config(format!("link '{}' has no channel to dial out with", self.name))
        })?;
        Ok(template.replace(NUMBER_PLACEHOLDER, number))
    }

    /// Whether some run currently holds this endpoint
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

impl Lockable for Endpoint {
    fn lock_key(&self) -> (i32, &str) {
        (self.prio, &self.name)
    }

    fn mutex(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    links: BTreeMap<String, Arc<Endpoint>>,
}

impl Registry {
    /// Build from already-merged link configuration. The default template
    /// entry is skipped.
    pub fn from_config(links: &BTreeMap<String, LinkConfig>) -> Self {
        let links = links
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_KEY)
            .map(|(name, cfg)| {
                let ep = Endpoint::new(name, cfg.channel.clone(), cfg.number.clone(), cfg.prio);
                (name.clone(), Arc::new(ep))
            })
            .collect();
        Self { links }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Endpoint>, TestError> {
        if name == DEFAULT_KEY {
            return Err(TestError::config(format!("'{}' is not a usable link", DEFAULT_KEY)));
        }
        self.links
            .get(name)
            .cloned()
            .ok_or_else(|| TestError::config(format!("unknown link '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
