use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::certificates::error::{DriverCatalogError, KeyStoresError, KeyStoresResult};
use crate::certificates::keystore::KeyStore;

/// Opens a PKCS#11 token as a key store. Hardware access lives outside this crate.
pub trait Pkcs11Provider: Send + Sync {
    fn open(&self, configuration: &Pkcs11Configuration, pin: &str) -> KeyStoresResult<Arc<dyn KeyStore>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SlotSelector {
    Slot(u32),
    SlotListIndex(u32),
}

/// Provider configuration for one token: library, and either a slot id or a
/// slot list index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pkcs11Configuration {
    name: String,
    library: String,
    slot: SlotSelector,
}

impl Pkcs11Configuration {
    pub fn builder() -> Pkcs11ConfigurationBuilder {
        Pkcs11ConfigurationBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn slot_id(&self) -> Option<u32> {
        match self.slot {
            SlotSelector::Slot(id) => Some(id),
            SlotSelector::SlotListIndex(_) => None,
        }
    }

    pub fn slot_list_index(&self) -> Option<u32> {
        match self.slot {
            SlotSelector::SlotListIndex(idx) => Some(idx),
            SlotSelector::Slot(_) => None,
        }
    }
}

fn escape_name(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for Pkcs11Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name = \"{}\"", escape_name(&self.name))?;
        writeln!(f, "library = {}", self.library)?;
        match self.slot {
            SlotSelector::SlotListIndex(idx) => writeln!(f, "slotListIndex = {idx}"),
            SlotSelector::Slot(id) => writeln!(f, "slot = {id}"),
        }
    }
}

#[derive(Debug)]
pub struct Pkcs11ConfigurationBuilder {
    name: String,
    library: String,
    slot: SlotSelector,
}

impl Default for Pkcs11ConfigurationBuilder {
    fn default() -> Self {
        Self {
            name: String::new(),
            library: String::new(),
            slot: SlotSelector::Slot(0),
        }
    }
}

impl Pkcs11ConfigurationBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn library(mut self, library: &str) -> Self {
        self.library = library.to_string();
        self
    }

    /// Replaces any slot list index.
    pub fn slot_id(mut self, slot: u32) -> Self {
        self.slot = SlotSelector::Slot(slot);
        self
    }

    /// Replaces any slot id.
    pub fn slot_list_index(mut self, index: u32) -> Self {
        self.slot = SlotSelector::SlotListIndex(index);
        self
    }

    pub fn build(self) -> KeyStoresResult<Pkcs11Configuration> {
        if self.name.trim().is_empty() {
            return Err(KeyStoresError::InvalidPkcs11Configuration(
                "name must not be empty".to_string(),
            ));
        }
        if self.library.trim().is_empty() {
            return Err(KeyStoresError::InvalidPkcs11Configuration(
                "library must not be empty".to_string(),
            ));
        }
        Ok(Pkcs11Configuration {
            name: self.name,
            library: self.library,
            slot: self.slot,
        })
    }
}

// the Pkcs11Driver struct is one entry of the driver catalog
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pkcs11Driver {
    name: String,
    library: String,
    slot: u32,
    slot_list_index: u32,
}

impl Pkcs11Driver {
    pub fn new(name: &str, library: &str, slot: u32, slot_list_index: u32) -> Self {
        Self {
            name: name.to_string(),
            library: library.to_string(),
            slot,
            slot_list_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn slot_list_index(&self) -> u32 {
        self.slot_list_index
    }

    pub fn configuration(&self, use_slot_list_index: bool) -> KeyStoresResult<Pkcs11Configuration> {
        let builder = Pkcs11Configuration::builder()
            .name(&self.name)
            .library(&self.library);
        let builder = if use_slot_list_index {
            builder.slot_list_index(self.slot_list_index)
        } else {
            builder.slot_id(self.slot)
        };
        builder.build()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename = "driverConfiguration")]
struct DriverCatalog {
    #[serde(rename = "driver", default)]
    drivers: Vec<DriverElement>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DriverElement {
    #[serde(default)]
    name: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    slot: String,
    #[serde(rename = "slotListIndex", default)]
    slot_list_index: String,
}

// anything that is not a non-negative integer counts as 0
fn lenient_index(value: &str) -> u32 {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

impl From<DriverElement> for Pkcs11Driver {
    fn from(element: DriverElement) -> Self {
        Pkcs11Driver {
            name: element.name,
            library: element.path,
            slot: lenient_index(&element.slot),
            slot_list_index: lenient_index(&element.slot_list_index),
        }
    }
}

impl From<&Pkcs11Driver> for DriverElement {
    fn from(driver: &Pkcs11Driver) -> Self {
        DriverElement {
            name: driver.name.clone(),
            path: driver.library.clone(),
            slot: driver.slot.to_string(),
            slot_list_index: driver.slot_list_index.to_string(),
        }
    }
}

const DEFAULT_DRIVERS_XML: &str = r#"<driverConfiguration>
  <driver>
    <name>OpenSC</name>
    <path>/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so</path>
    <slot>0</slot>
    <slotListIndex>0</slotListIndex>
  </driver>
  <driver>
    <name>SoftHSM 2</name>
    <path>/usr/lib/softhsm/libsofthsm2.so</path>
    <slot>0</slot>
    <slotListIndex>0</slotListIndex>
  </driver>
  <driver>
    <name>Belgian eID</name>
    <path>/usr/lib/x86_64-linux-gnu/libbeidpkcs11.so.0</path>
    <slot>0</slot>
    <slotListIndex>0</slotListIndex>
  </driver>
</driverConfiguration>
"#;

fn parse_catalog(xml: &str) -> Result<Vec<Pkcs11Driver>, quick_xml::DeError> {
    let catalog: DriverCatalog = quick_xml::de::from_str(xml)?;
    Ok(catalog.drivers.into_iter().map(Pkcs11Driver::from).collect())
}

pub fn default_drivers() -> Vec<Pkcs11Driver> {
    parse_catalog(DEFAULT_DRIVERS_XML).unwrap_or_default()
}

pub type DriversChangeListener = Arc<dyn Fn(&[Pkcs11Driver]) + Send + Sync>;

/// Persisted, ordered catalog of PKCS#11 drivers.
///
/// A missing or unreadable file yields the bundled defaults; the file itself is
/// only touched by [`Pkcs11Drivers::save`].
pub struct Pkcs11Drivers {
    path: PathBuf,
    drivers: Vec<Pkcs11Driver>,
    listeners: Vec<DriversChangeListener>,
}

impl Pkcs11Drivers {
    pub fn load(path: &Path) -> Self {
        let drivers = match std::fs::read_to_string(path) {
            Ok(contents) => match parse_catalog(&contents) {
                Ok(drivers) => drivers,
                Err(e) => {
                    warn!(
                        "Malformed PKCS#11 driver catalog '{}', using defaults: {e}",
                        path.display()
                    );
                    default_drivers()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No PKCS#11 driver catalog at '{}', using defaults", path.display());
                default_drivers()
            }
            Err(e) => {
                warn!(
                    "Failed to read PKCS#11 driver catalog '{}', using defaults: {e}",
                    path.display()
                );
                default_drivers()
            }
        };
        Self {
            path: path.to_path_buf(),
            drivers,
            listeners: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn drivers(&self) -> &[Pkcs11Driver] {
        &self.drivers
    }

    pub fn get(&self, index: usize) -> Option<&Pkcs11Driver> {
        self.drivers.get(index)
    }

    pub fn add(&mut self, driver: Pkcs11Driver) {
        self.drivers.push(driver);
    }

    /// Replaces the driver at `index`; `false` if out of range.
    pub fn set(&mut self, index: usize, driver: Pkcs11Driver) -> bool {
        match self.drivers.get_mut(index) {
            Some(slot) => {
                *slot = driver;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Pkcs11Driver> {
        (index < self.drivers.len()).then(|| self.drivers.remove(index))
    }

    pub fn add_change_listener(&mut self, listener: DriversChangeListener) {
        self.listeners.push(listener);
    }

    /// Writes the catalog and notifies change listeners.
    pub fn save(&self) -> Result<(), DriverCatalogError> {
        let catalog = DriverCatalog {
            drivers: self.drivers.iter().map(DriverElement::from).collect(),
        };
        let mut xml = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut xml);
        serializer.indent(' ', 2);
        catalog
            .serialize(serializer)
            .map_err(|e| DriverCatalogError::Serialize(e.to_string()))?;
        xml.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DriverCatalogError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, xml).map_err(|source| DriverCatalogError::Write {
            path: self.path.clone(),
            source,
        })?;

        for listener in self.listeners.iter() {
            listener(&self.drivers);
        }
        Ok(())
    }
}
