//! Country lookup using a memory-mapped MaxMind GeoLite2/GeoIP2 City database

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

/// Resolves client addresses to ISO country codes. Without a database every lookup misses.
#[derive(Clone, Default)]
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = match city_path {
            Some(path) => {
                let reader = unsafe { Reader::open_mmap(path) }
                    .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
                Some(Arc::new(reader))
            }
            None => None,
        };

        Ok(Self { city_reader })
    }

    pub fn is_enabled(&self) -> bool {
        self.city_reader.is_some()
    }

    /// ISO country code for `ip`, if the database knows it
    pub fn country(&self, ip: IpAddr) -> Option<String> {
        let reader = self.city_reader.as_ref()?;
        let result = reader.lookup(ip).ok()?;

        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            if let Some(code) = city.country.iso_code {
                return Some(code.to_string());
            }
        }

        // City databases are a superset of Country data
        result
            .decode::<geoip2::Country>()
            .ok()
            .flatten()
            .and_then(|country| country.country.iso_code.map(|s| s.to_string()))
    }
}
