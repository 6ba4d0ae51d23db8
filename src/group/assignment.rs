//! Range partition assignment.
//!
//! The elected group leader runs this on the full membership and ships the
//! result back through group sync. The function is pure and deterministic:
//! the same members and the same topology always produce the same plan.

use std::collections::BTreeMap;

use crate::metadata::ClusterMetadata;
use crate::transport::{GroupMemberInfo, MemberAssignment};
use crate::types::PartitionId;

/// Assign every partition of every subscribed topic to exactly one member.
///
/// Members are sorted by id and partitions by (topic, id). Each topic's
/// partitions are split into contiguous ranges, with the first
/// `partitions % members` members receiving one extra partition.
pub(crate) fn range_assign(
    members: &[GroupMemberInfo],
    metadata: &ClusterMetadata,
) -> Vec<MemberAssignment> {
    let mut sorted_members: Vec<&GroupMemberInfo> = members.iter().collect();
    sorted_members.sort_by(|a, b| a.member_id.cmp(&b.member_id));

    let mut plan: BTreeMap<&str, Vec<(String, PartitionId)>> = sorted_members
        .iter()
        .map(|member| (member.member_id.as_str(), Vec::new()))
        .collect();

    // the union of all member subscriptions, deduplicated and ordered
    let mut topics: Vec<&str> = sorted_members
        .iter()
        .flat_map(|member| member.topics.iter().map(String::as_str))
        .collect();
    topics.sort_unstable();
    topics.dedup();

    for topic in topics {
        let Some(topic_meta) = metadata.topic(topic) else {
            continue;
        };
        let subscribers: Vec<&&GroupMemberInfo> = sorted_members
            .iter()
            .filter(|member| member.topics.iter().any(|t| t == topic))
            .collect();
        if subscribers.is_empty() {
            continue;
        }

        let partition_count = topic_meta.partitions.len();
        let base = partition_count / subscribers.len();
        let extra = partition_count % subscribers.len();

        let mut next_partition: usize = 0;
        for (rank, member) in subscribers.iter().enumerate() {
            let share = base + usize::from(rank < extra);
            for _ in 0..share {
                if let Some(slot) = plan.get_mut(member.member_id.as_str()) {
                    slot.push((topic.to_owned(), next_partition as PartitionId));
                }
                next_partition += 1;
            }
        }
    }

    plan.into_iter()
        .map(|(member_id, partitions)| MemberAssignment {
            member_id: member_id.to_owned(),
            partitions,
        })
        .collect()
}
