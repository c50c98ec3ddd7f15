//! Splitting an OID set into GetRequests that fit one datagram.
//!
//! The whole set is sized first. When it exceeds the send limit it is cut into
//! `K = ceil(size / send_max)` groups of `ceil(N / K)` OIDs, the last group
//! taking the remainder. Each group is sized again and split by the same rule
//! until it fits, so every emitted message respects the limit. OID order is
//! preserved and every OID lands in exactly one message.

use std::ops::Range;

use thiserror::Error;

use crate::{
    message::{MessageBuilder, RequestMessage},
    oid::Oid,
};

/// Datagram-safe request size used by PDU controllers.
pub const DEFAULT_SEND_MAX: usize = 255;

/// Errors that can occur while fragmenting a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// Even a single-OID request exceeds the limit.
    #[error("OID {oid} needs a {size}-byte request, send limit is {send_max}")]
    OidTooLarge {
        oid: Oid,
        size: usize,
        send_max: usize,
    },
}

/// Computes the OID index ranges of each fragment without building anything.
///
/// # Errors
/// Returns [`FragmentError::OidTooLarge`] when one OID cannot fit alone.
pub fn plan_fragments(
    builder: &MessageBuilder,
    oids: &[Oid],
    send_max: usize,
) -> Result<Vec<Range<usize>>, FragmentError> {
    let mut plan = Vec::new();
    if !oids.is_empty() {
        split(builder, oids, 0..oids.len(), send_max, &mut plan)?;
    }
    Ok(plan)
}

fn split(
    builder: &MessageBuilder,
    oids: &[Oid],
    range: Range<usize>,
    send_max: usize,
    plan: &mut Vec<Range<usize>>,
) -> Result<(), FragmentError> {
    let size = builder.get_request_size(&oids[range.clone()]);
    if size <= send_max {
        plan.push(range);
        return Ok(());
    }

    let count = range.len();
    if count == 1 {
        return Err(FragmentError::OidTooLarge {
            oid: oids[range.start].clone(),
            size,
            send_max,
        });
    }

    let fragments = size.div_ceil(send_max.max(1));
    let per_fragment = count.div_ceil(fragments);
    log::debug!(
        "Request for {} OIDs is {} bytes (limit {}), splitting into groups of {}",
        count,
        size,
        send_max,
        per_fragment
    );

    let mut start = range.start;
    while start < range.end {
        let end = (start + per_fragment).min(range.end);
        split(builder, oids, start..end, send_max, plan)?;
        start = end;
    }
    Ok(())
}

/// Builds the GetRequest messages covering `oids`, each at most `send_max` bytes.
///
/// # Errors
/// Returns [`FragmentError::OidTooLarge`] when one OID cannot fit alone.
pub fn fragment(
    builder: &mut MessageBuilder,
    oids: &[Oid],
    send_max: usize,
) -> Result<Vec<RequestMessage>, FragmentError> {
    let plan = plan_fragments(builder, oids, send_max)?;
    Ok(plan
        .into_iter()
        .map(|range| builder.build_get_request(&oids[range]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oids(count: usize) -> Vec<Oid> {
        (0..count)
            .map(|i| {
                format!("1.3.6.1.4.1.318.1.1.26.8.3.1.5.{}", i + 1)
                    .parse()
                    .unwrap()
            })
            .collect()
    }

    fn assert_partition(messages: &[RequestMessage], expected: &[Oid]) {
        let flattened: Vec<Oid> = messages
            .iter()
            .flat_map(|m| m.oids().iter().cloned())
            .collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_small_set_is_one_message() {
        let mut builder = MessageBuilder::new("public");
        let input = oids(3);
        let messages = fragment(&mut builder, &input, DEFAULT_SEND_MAX).unwrap();
        assert_eq!(messages.len(), 1);
        assert_partition(&messages, &input);
    }

    #[test]
    fn test_hundred_oids_split_within_limit() {
        let mut builder = MessageBuilder::new("public");
        let input = oids(100);
        assert!(builder.get_request_size(&input) > DEFAULT_SEND_MAX);

        let messages = fragment(&mut builder, &input, DEFAULT_SEND_MAX).unwrap();
        assert!(messages.len() >= 2);
        for m in &messages {
            assert!(m.len() <= DEFAULT_SEND_MAX, "fragment of {} bytes", m.len());
        }
        assert_partition(&messages, &input);
    }

    #[test]
    fn test_fragments_take_distinct_request_ids() {
        let mut builder = MessageBuilder::new("public");
        let messages = fragment(&mut builder, &oids(40), DEFAULT_SEND_MAX).unwrap();
        let ids: Vec<u8> = messages.iter().map(|m| m.request_id()).collect();
        let expected: Vec<u8> = (0..messages.len() as u8).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_resplits_oversized_groups() {
        let builder = MessageBuilder::new("public");
        let input = oids(30);
        // Tight enough that the first-pass group size still overflows.
        let send_max = builder.get_request_size(&input[..2]);
        let plan = plan_fragments(&builder, &input, send_max).unwrap();
        for range in &plan {
            assert!(builder.get_request_size(&input[range.clone()]) <= send_max);
        }
        let covered: Vec<usize> = plan.iter().flat_map(|r| r.clone()).collect();
        assert_eq!(covered, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_oid_too_large() {
        let mut builder = MessageBuilder::new("public");
        let input = oids(5);
        let err = fragment(&mut builder, &input, 20).unwrap_err();
        assert!(matches!(err, FragmentError::OidTooLarge { send_max: 20, .. }));
        // Nothing was built.
        assert_eq!(builder.next_request_id(), 0);
    }

    #[test]
    fn test_empty_set() {
        let mut builder = MessageBuilder::new("public");
        assert!(fragment(&mut builder, &[], DEFAULT_SEND_MAX)
            .unwrap()
            .is_empty());
    }
}
