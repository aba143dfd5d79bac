use crate::datafile::TrafficAllocation;

/// Traffic allocations are expressed as ranges of `[0, MAX_TRAFFIC_VALUE)`.
pub const MAX_TRAFFIC_VALUE: u64 = 10_000;

pub trait Sharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64;
}

pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let int_from_hash: u64 = (hash[0] as u64) << 24
            | (hash[1] as u64) << 16
            | (hash[2] as u64) << 8
            | (hash[3] as u64);
        int_from_hash % total_shards
    }
}

/// Pick the entity whose allocation range contains the bucket value of `bucketing_id` for
/// `parent_id` (an experiment, rollout rule or group id).
///
/// Returns `None` when the value falls outside every range, i.e. the user is not part of the
/// traffic.
pub(crate) fn bucket<'a>(
    sharder: &impl Sharder,
    bucketing_id: &str,
    parent_id: &str,
    allocations: &'a [TrafficAllocation],
) -> Option<&'a str> {
    let value = sharder.get_shard(&format!("{bucketing_id}{parent_id}"), MAX_TRAFFIC_VALUE);
    log::trace!(target: "abserve", bucketing_id, parent_id, value; "computed bucket value");

    allocations
        .iter()
        .find(|allocation| value < allocation.end_of_range)
        .map(|allocation| allocation.entity_id.as_str())
        .filter(|entity_id| !entity_id.is_empty())
}

#[cfg(test)]
pub struct DeterministicSharder(pub std::collections::HashMap<String, u64>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64 {
        self.0.get(input).copied().unwrap_or(0) % total_shards
    }
}
