use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::geo::{haversine_km, GeoPoint};
use crate::models::dispatch::Phase;
use crate::models::driver::{Driver, LocationFix};
use crate::models::vehicle::VehicleStatus;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct Eligible {
    pub driver: Driver,
    pub location: Option<LocationFix>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub distance_km: Option<f64>,
}

pub fn eligible_drivers(store: &Store) -> Vec<Eligible> {
    store
        .drivers()
        .into_iter()
        .filter(|driver| driver.is_assignable())
        .filter(|driver| {
            driver
                .vehicle_id
                .and_then(|vehicle_id| store.vehicle(vehicle_id))
                .is_some_and(|vehicle| vehicle.status == VehicleStatus::Available)
        })
        .map(|driver| Eligible {
            location: store.location(driver.id),
            driver,
        })
        .collect()
}

pub fn select<R: Rng + ?Sized>(
    phase: Phase,
    pickup: Option<&GeoPoint>,
    pool: &[Eligible],
    rng: &mut R,
) -> Option<Candidate> {
    match phase {
        Phase::Nearby => pickup
            .and_then(|pickup| nearest(pickup, pool))
            .or_else(|| most_recently_active(pool)),
        Phase::Broadcast => pool.choose(rng).map(|eligible| Candidate {
            driver_id: eligible.driver.id,
            distance_km: None,
        }),
    }
}

pub fn nearest(pickup: &GeoPoint, pool: &[Eligible]) -> Option<Candidate> {
    pool.iter()
        .filter_map(|eligible| {
            let fix = eligible.location?;
            Some(Candidate {
                driver_id: eligible.driver.id,
                distance_km: Some(haversine_km(&fix.point, pickup)),
            })
        })
        .min_by(|a, b| {
            a.distance_km
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.distance_km.unwrap_or(f64::INFINITY))
        })
}

pub fn most_recently_active(pool: &[Eligible]) -> Option<Candidate> {
    pool.iter()
        .max_by_key(|eligible| eligible.driver.status_updated_at)
        .map(|eligible| Candidate {
            driver_id: eligible.driver.id,
            distance_km: None,
        })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    use super::{most_recently_active, nearest, select, Eligible};
    use crate::geo::GeoPoint;
    use crate::models::dispatch::Phase;
    use crate::models::driver::{Driver, LocationFix};

    fn eligible(lat: Option<f64>, minutes_ago: i64) -> Eligible {
        let now = Utc::now();
        let driver = Driver::new(
            "crew".to_string(),
            Some(Uuid::new_v4()),
            now - Duration::minutes(minutes_ago),
        );
        Eligible {
            driver,
            location: lat.map(|lat| LocationFix {
                point: GeoPoint { lat, lng: 106.8 },
                recorded_at: now,
            }),
        }
    }

    fn pickup() -> GeoPoint {
        GeoPoint {
            lat: -6.2,
            lng: 106.8,
        }
    }

    #[test]
    fn nearby_picks_the_closest_located_driver() {
        let far = eligible(Some(-6.5), 0);
        let near = eligible(Some(-6.21), 30);
        let unknown = eligible(None, 0);
        let pool = vec![far, near.clone(), unknown];

        let candidate = nearest(&pickup(), &pool).unwrap();
        assert_eq!(candidate.driver_id, near.driver.id);
        assert!(candidate.distance_km.unwrap() < 2.0);
    }

    #[test]
    fn nearby_without_pickup_falls_back_to_most_recent_activity() {
        let stale = eligible(Some(-6.2), 60);
        let fresh = eligible(Some(-7.0), 1);
        let pool = vec![stale, fresh.clone()];
        let mut rng = StdRng::seed_from_u64(7);

        let candidate = select(Phase::Nearby, None, &pool, &mut rng).unwrap();
        assert_eq!(candidate.driver_id, fresh.driver.id);
    }

    #[test]
    fn nearby_without_any_location_falls_back_too() {
        let stale = eligible(None, 60);
        let fresh = eligible(None, 2);
        let pool = vec![stale, fresh.clone()];

        assert_eq!(nearest(&pickup(), &pool), None);
        assert_eq!(
            most_recently_active(&pool).unwrap().driver_id,
            fresh.driver.id
        );
    }

    #[test]
    fn broadcast_reaches_every_eligible_driver() {
        let pool: Vec<Eligible> = (0..3).map(|i| eligible(Some(-6.2 - i as f64), 0)).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..200 {
            let candidate = select(Phase::Broadcast, Some(&pickup()), &pool, &mut rng).unwrap();
            seen.insert(candidate.driver_id);
        }

        assert_eq!(seen.len(), pool.len());
    }

    #[test]
    fn empty_pool_has_no_candidate() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select(Phase::Nearby, Some(&pickup()), &[], &mut rng).is_none());
        assert!(select(Phase::Broadcast, Some(&pickup()), &[], &mut rng).is_none());
    }
}
