use serde::Serialize;

/// The five bookable time windows per day. One balloon, one ride per slot.
pub const TIME_SLOTS: [&str; 5] = [
    "06.00am - 07.00am",
    "07.30am - 08.30am",
    "09.00am - 10.00am",
    "10.30am - 11.30am",
    "05.00pm - 06.00pm",
];

/// A ride plan. Prices live here so clients can never set their own.
#[derive(Debug, Clone, Serialize)]
pub struct RidePlan {
    pub id: i64,
    pub name: &'static str,
    pub duration: &'static str,
    pub max_guests: i64,
    pub amenity: &'static str,
    pub price: i64,
    pub popular: bool,
}

pub static RIDE_PLANS: [RidePlan; 2] = [
    RidePlan {
        id: 1,
        name: "Classic Sunrise Ride",
        duration: "45 - 60 Minutes",
        max_guests: 4,
        amenity: "Complementary Tea/Coffee",
        price: 1500,
        popular: true,
    },
    RidePlan {
        id: 2,
        name: "Premium Couple Ride",
        duration: "45 - 60 Minutes",
        max_guests: 4,
        amenity: "Complementary Tea/Coffee",
        price: 3999,
        popular: false,
    },
];

pub fn plan_by_id(id: i64) -> Option<&'static RidePlan> {
    RIDE_PLANS.iter().find(|p| p.id == id)
}

/// Whether `slot` is one of the catalog time windows, byte-for-byte.
pub fn is_catalog_slot(slot: &str) -> bool {
    TIME_SLOTS.contains(&slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_slots() {
        assert_eq!(TIME_SLOTS.len(), 5);
    }

    #[test]
    fn test_slots_are_unique() {
        for (i, a) in TIME_SLOTS.iter().enumerate() {
            for b in TIME_SLOTS.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_known_slot() {
        assert!(is_catalog_slot("09.00am - 10.00am"));
    }

    #[test]
    fn test_unknown_slot() {
        assert!(!is_catalog_slot("9:00 - 10:00"));
    }

    #[test]
    fn test_slot_match_is_exact() {
        assert!(!is_catalog_slot("09.00am - 10.00am "));
    }

    #[test]
    fn test_plan_lookup() {
        let plan = plan_by_id(1).unwrap();
        assert_eq!(plan.name, "Classic Sunrise Ride");
        assert_eq!(plan.price, 1500);
    }

    #[test]
    fn test_premium_plan_price() {
        assert_eq!(plan_by_id(2).unwrap().price, 3999);
    }

    #[test]
    fn test_unknown_plan() {
        assert!(plan_by_id(99).is_none());
    }
}
