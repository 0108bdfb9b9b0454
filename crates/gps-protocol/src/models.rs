//! Legacy product database
//!
//! Devices that predate the protocol array never say what they support.
//! Their capabilities are known per product id, and for a few ids per
//! software version range.

use crate::capabilities::{Capabilities, CapabilityToken};

/// Capabilities of one product over a software version range (static version)
#[derive(Debug, Clone, Copy)]
pub struct LegacyProductStatic {
    pub product_id: u16,
    /// Model name
    pub model: &'static str,
    /// Lowest software version (times 100) this entry applies to
    pub min_version: i16,
    /// First software version (times 100) this entry no longer applies to
    pub max_version: i16,
    pub tokens: &'static [CapabilityToken],
}

impl LegacyProductStatic {
    fn matches(&self, product_id: u16, software_version: i16) -> bool {
        self.product_id == product_id
            && software_version >= self.min_version
            && software_version < self.max_version
    }

    pub fn capabilities(&self) -> Capabilities {
        self.tokens.iter().copied().collect()
    }
}

/// Database of pre-protocol-array products
pub struct LegacyDatabase;

impl LegacyDatabase {
    /// Capabilities of a product, if it is a known legacy model
    pub fn lookup(product_id: u16, software_version: i16) -> Option<Capabilities> {
        Self::entry(product_id, software_version).map(LegacyProductStatic::capabilities)
    }

    /// Table entry for a product and software version
    pub fn entry(product_id: u16, software_version: i16) -> Option<&'static LegacyProductStatic> {
        LEGACY_PRODUCTS
            .iter()
            .find(|p| p.matches(product_id, software_version))
    }

    /// Model name of a product id
    pub fn model_name(product_id: u16) -> Option<&'static str> {
        LEGACY_PRODUCTS
            .iter()
            .find(|p| p.product_id == product_id)
            .map(|p| p.model)
    }

    pub fn products() -> impl Iterator<Item = &'static LegacyProductStatic> {
        LEGACY_PRODUCTS.iter()
    }
}

const fn t(tag: char, number: u16) -> CapabilityToken {
    CapabilityToken::new(tag, number)
}

const ANY: (i16, i16) = (i16::MIN, i16::MAX);

macro_rules! legacy {
    ($id:expr, $model:expr, $range:expr, [$($tag:literal $num:literal),* $(,)?]) => {
        LegacyProductStatic {
            product_id: $id,
            model: $model,
            min_version: $range.0,
            max_version: $range.1,
            tokens: &[$(t($tag, $num)),*],
        }
    };
}

// Link, command, then application/data pairs in the order devices list them
static LEGACY_PRODUCTS: &[LegacyProductStatic] = &[
    legacy!(7, "GPS 75", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 500, 'D' 500,
    ]),
    legacy!(13, "GPS 75", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 500,
    ]),
    legacy!(14, "GPS 55", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 400, 'D' 400,
        'A' 500, 'D' 500,
    ]),
    legacy!(15, "GPS 55 AVD", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 151, 'A' 200, 'D' 200, 'D' 151, 'A' 400, 'D' 151,
        'A' 500, 'D' 500,
    ]),
    legacy!(18, "GPS 65", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 500,
    ]),
    legacy!(20, "GPS 150", ANY, [
        'L' 2, 'A' 11, 'A' 100, 'D' 150, 'A' 200, 'D' 201, 'D' 150, 'A' 400, 'D' 450,
        'A' 500, 'D' 550,
    ]),
    legacy!(22, "GPS 95 AVD", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 152, 'A' 200, 'D' 200, 'D' 152, 'A' 300, 'D' 300,
        'A' 400, 'D' 152, 'A' 500, 'D' 500,
    ]),
    legacy!(23, "GPS 75", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 500,
    ]),
    legacy!(24, "GPS 95", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 500,
    ]),
    legacy!(25, "GPS 38", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 500,
    ]),
    legacy!(29, "GPS 12", (i16::MIN, 400), [
        'L' 1, 'A' 10, 'A' 100, 'D' 101, 'A' 200, 'D' 201, 'D' 101, 'A' 300, 'D' 300,
        'A' 400, 'D' 101, 'A' 500, 'D' 500,
    ]),
    legacy!(29, "GPS 12", (400, i16::MAX), [
        'L' 1, 'A' 10, 'A' 100, 'D' 102, 'A' 200, 'D' 201, 'D' 102, 'A' 300, 'D' 300,
        'A' 400, 'D' 102, 'A' 500, 'D' 500,
    ]),
    legacy!(31, "GPS 12", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 201, 'D' 100, 'A' 300, 'D' 300,
        'A' 500, 'D' 500,
    ]),
    legacy!(33, "GPS 95 XL", ANY, [
        'L' 2, 'A' 11, 'A' 100, 'D' 150, 'A' 200, 'D' 201, 'D' 150, 'A' 400, 'D' 450,
        'A' 500, 'D' 550,
    ]),
    legacy!(35, "GPS 38 J", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 200, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 500,
    ]),
    legacy!(41, "GPS 38 CHN", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 201, 'D' 100, 'A' 300, 'D' 300,
        'A' 500, 'D' 500,
    ]),
    legacy!(44, "GPS II", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 101, 'A' 200, 'D' 201, 'D' 101, 'A' 300, 'D' 300,
        'A' 400, 'D' 101, 'A' 500, 'D' 500,
    ]),
    legacy!(45, "GPS 90", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 152, 'A' 200, 'D' 201, 'D' 152, 'A' 300, 'D' 300,
        'A' 400, 'D' 152, 'A' 500, 'D' 500,
    ]),
    legacy!(49, "GPS 12 CX", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 102, 'A' 200, 'D' 201, 'D' 102, 'A' 300, 'D' 300,
        'A' 400, 'D' 102, 'A' 500, 'D' 501,
    ]),
    legacy!(73, "GPS 12 XL", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 500, 'D' 501,
    ]),
    legacy!(76, "GPS II Plus", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 102, 'A' 200, 'D' 201, 'D' 102, 'A' 300, 'D' 300,
        'A' 400, 'D' 102, 'A' 500, 'D' 501,
    ]),
    legacy!(77, "GPS 12", (i16::MIN, 301), [
        'L' 1, 'A' 10, 'A' 100, 'D' 100, 'A' 200, 'D' 201, 'D' 100, 'A' 300, 'D' 300,
        'A' 400, 'D' 400, 'A' 500, 'D' 501,
    ]),
    legacy!(77, "GPS 12", (301, 350), [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 400, 'D' 403, 'A' 500, 'D' 501,
    ]),
    legacy!(77, "GPS 12", (350, 361), [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 500, 'D' 501,
    ]),
    legacy!(77, "GPS 12", (361, i16::MAX), [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 400, 'D' 403, 'A' 500, 'D' 501,
    ]),
    legacy!(87, "GPS 12 Map", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 400, 'D' 403, 'A' 500, 'D' 501,
    ]),
    legacy!(88, "GPSMAP 215", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 102, 'A' 200, 'D' 201, 'D' 102, 'A' 300, 'D' 300,
        'A' 400, 'D' 102, 'A' 500, 'D' 501,
    ]),
    legacy!(95, "GPS III", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 400, 'D' 403, 'A' 500, 'D' 501,
    ]),
    legacy!(96, "GPS 12", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 400, 'D' 403, 'A' 500, 'D' 501,
    ]),
    legacy!(100, "GPS 12 XL", ANY, [
        'L' 1, 'A' 10, 'A' 100, 'D' 103, 'A' 200, 'D' 201, 'D' 103, 'A' 300, 'D' 300,
        'A' 400, 'D' 403, 'A' 500, 'D' 501,
    ]),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::waypoint::WaypointFormat;
    use crate::LinkProtocol;

    #[test]
    fn test_lookup_plain_entry() {
        let caps = LegacyDatabase::lookup(73, 250).unwrap();
        assert_eq!(caps.waypoint_format(), Some(WaypointFormat::D103));
        assert_eq!(caps.link_protocol(), LinkProtocol::L001);
        assert!(caps.supports_track_transfer());
        assert!(!caps.supports("A400"));
    }

    #[test]
    fn test_version_conditional_entries() {
        assert_eq!(
            LegacyDatabase::lookup(29, 399).unwrap().waypoint_format(),
            Some(WaypointFormat::D101)
        );
        assert_eq!(
            LegacyDatabase::lookup(29, 400).unwrap().waypoint_format(),
            Some(WaypointFormat::D102)
        );
        assert!(LegacyDatabase::lookup(77, 300).unwrap().supports("D400"));
        assert!(!LegacyDatabase::lookup(77, 355).unwrap().supports("A400"));
        assert!(LegacyDatabase::lookup(77, 361).unwrap().supports("D403"));
    }

    #[test]
    fn test_second_generation_link() {
        let caps = LegacyDatabase::lookup(20, 200).unwrap();
        assert_eq!(caps.link_protocol(), LinkProtocol::L002);
        // D150 has no codec here
        assert_eq!(caps.waypoint_format(), None);
    }

    #[test]
    fn test_unknown_product() {
        assert!(LegacyDatabase::lookup(9_999, 100).is_none());
        assert_eq!(LegacyDatabase::model_name(88), Some("GPSMAP 215"));
    }

    #[test]
    fn test_version_ranges_do_not_overlap() {
        for a in LegacyDatabase::products() {
            for b in LegacyDatabase::products() {
                if std::ptr::eq(a, b) || a.product_id != b.product_id {
                    continue;
                }
                assert!(
                    a.max_version <= b.min_version || b.max_version <= a.min_version,
                    "overlapping entries for product {}",
                    a.product_id
                );
            }
        }
    }
}
