//! Merge operators joining several source streams into one trigger stream.

use crate::dataflow::SourcePacket;
use async_stream::stream;
use futures::future;
use futures::stream::{self, select_all, BoxStream, StreamExt};
use reflowcore::{Edge, MergeMode};
use std::collections::VecDeque;

pub type PacketStream = BoxStream<'static, SourcePacket>;
pub type TriggerStream = BoxStream<'static, Vec<SourcePacket>>;

/// Combination strategy for a set of edges.
///
/// Mixed modes resolve by priority `ZIP > WITH_LATEST_FROM > COMBINE_LATEST >
/// MERGE`. Unset modes count as `COMBINE_LATEST`, so `MERGE` applies only
/// when every edge asks for it.
pub fn resolve_mode<'a>(edges: impl IntoIterator<Item = &'a Edge>) -> MergeMode {
    let modes: Vec<Option<MergeMode>> = edges.into_iter().map(|e| e.mode).collect();
    let has = |mode: MergeMode| modes.contains(&Some(mode));

    if has(MergeMode::Zip) {
        MergeMode::Zip
    } else if has(MergeMode::WithLatestFrom) {
        MergeMode::WithLatestFrom
    } else if !modes.is_empty() && modes.iter().all(|m| *m == Some(MergeMode::Merge)) {
        MergeMode::Merge
    } else {
        MergeMode::CombineLatest
    }
}

/// Combine `sources` per `mode`; `primary` is the index of the
/// `WITH_LATEST_FROM` primary source, if one is marked.
pub fn combine(mode: MergeMode, mut sources: Vec<PacketStream>, primary: Option<usize>) -> TriggerStream {
    if sources.len() == 1 {
        if let Some(only) = sources.pop() {
            return only.map(|packet| vec![packet]).boxed();
        }
    }
    match mode {
        MergeMode::Merge => merge(sources),
        MergeMode::Zip => zip(sources),
        MergeMode::CombineLatest => combine_latest(sources),
        MergeMode::WithLatestFrom => match primary {
            Some(primary) => with_latest_from(sources, primary),
            None => {
                tracing::warn!("WITH_LATEST_FROM without a primary edge, using COMBINE_LATEST");
                combine_latest(sources)
            }
        },
    }
}

fn tagged(sources: Vec<PacketStream>) -> BoxStream<'static, (usize, SourcePacket)> {
    select_all(
        sources
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.map(move |packet| (i, packet)).boxed()),
    )
    .boxed()
}

/// Every emission of every source triggers on its own
pub fn merge(sources: Vec<PacketStream>) -> TriggerStream {
    select_all(sources).map(|packet| vec![packet]).boxed()
}

/// Re-triggers on any emission once every source has emitted
pub fn combine_latest(sources: Vec<PacketStream>) -> TriggerStream {
    let n = sources.len();
    tagged(sources)
        .scan(vec![None; n], |latest: &mut Vec<Option<SourcePacket>>, (i, packet)| {
            latest[i] = Some(packet);
            let ready = latest.iter().all(Option::is_some);
            future::ready(Some(
                ready.then(|| latest.iter().flatten().cloned().collect::<Vec<_>>()),
            ))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Triggers only when the primary source emits, attaching the latest value
/// of every other source
pub fn with_latest_from(sources: Vec<PacketStream>, primary: usize) -> TriggerStream {
    let n = sources.len();
    tagged(sources)
        .scan(vec![None; n], move |latest: &mut Vec<Option<SourcePacket>>, (i, packet)| {
            latest[i] = Some(packet);
            let ready = i == primary && latest.iter().all(Option::is_some);
            future::ready(Some(
                ready.then(|| latest.iter().flatten().cloned().collect::<Vec<_>>()),
            ))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Pairs the k-th emission of every source; ends once any finished source
/// has nothing left to pair
pub fn zip(sources: Vec<PacketStream>) -> TriggerStream {
    let n = sources.len();
    let ended = sources
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            s.map(move |packet| (i, Some(packet)))
                .chain(stream::once(future::ready((i, None))))
                .boxed()
        });
    let mut merged = select_all(ended);

    stream! {
        let mut queues: Vec<VecDeque<SourcePacket>> = vec![VecDeque::new(); n];
        let mut finished = vec![false; n];

        while let Some((i, item)) = merged.next().await {
            match item {
                Some(packet) => queues[i].push_back(packet),
                None => finished[i] = true,
            }
            while queues.iter().all(|q| !q.is_empty()) {
                let row: Vec<SourcePacket> = queues.iter_mut().filter_map(VecDeque::pop_front).collect();
                yield row;
            }
            if (0..n).any(|j| finished[j] && queues[j].is_empty()) {
                break;
            }
        }
    }
    .boxed()
}

enum Arrival {
    Trigger(Vec<SourcePacket>),
    Optional(usize, Option<SourcePacket>),
}

/// Attaches the latest packet of every optional source to each trigger.
///
/// Triggers are held until each optional source has emitted or finished.
/// Optional sources never trigger on their own, and one that finishes
/// without emitting contributes nothing.
pub fn attach_optional(triggers: TriggerStream, optional: Vec<PacketStream>) -> TriggerStream {
    if optional.is_empty() {
        return triggers;
    }
    let n = optional.len();
    let mut arrivals = select_all(
        std::iter::once(triggers.map(Arrival::Trigger).boxed()).chain(
            optional.into_iter().enumerate().map(|(i, s)| {
                s.map(move |packet| Arrival::Optional(i, Some(packet)))
                    .chain(stream::once(future::ready(Arrival::Optional(i, None))))
                    .boxed()
            }),
        ),
    );

    stream! {
        let mut latest: Vec<Option<SourcePacket>> = vec![None; n];
        let mut settled = vec![false; n];
        let mut held: VecDeque<Vec<SourcePacket>> = VecDeque::new();

        while let Some(arrival) = arrivals.next().await {
            match arrival {
                Arrival::Trigger(row) => held.push_back(row),
                Arrival::Optional(i, Some(packet)) => {
                    latest[i] = Some(packet);
                    settled[i] = true;
                }
                Arrival::Optional(i, None) => settled[i] = true,
            }
            if settled.iter().all(|s| *s) {
                while let Some(mut row) = held.pop_front() {
                    row.extend(latest.iter().flatten().cloned());
                    yield row;
                }
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::EdgeValue;
    use reflowcore::Value;

    fn packets(source: &str, values: &[i64]) -> PacketStream {
        let source = source.to_string();
        stream::iter(values.to_vec())
            .map(move |v| SourcePacket {
                source: source.clone(),
                values: vec![EdgeValue {
                    edge_index: 0,
                    weight: 0,
                    to_property: Some("in".into()),
                    value: Value::from(v),
                }],
            })
            .boxed()
    }

    fn firsts(row: &[SourcePacket]) -> Vec<(String, f64)> {
        row.iter()
            .map(|p| (p.source.clone(), p.values[0].value.as_f64().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn mode_priority_and_default() {
        let zip = Edge::new("a", "c").with_mode(MergeMode::Zip);
        let merge = Edge::new("b", "c").with_mode(MergeMode::Merge);
        let plain = Edge::new("b", "c");

        assert_eq!(resolve_mode([&zip, &merge]), MergeMode::Zip);
        assert_eq!(resolve_mode([&merge, &merge]), MergeMode::Merge);
        assert_eq!(resolve_mode([&merge, &plain]), MergeMode::CombineLatest);
    }

    #[tokio::test]
    async fn zip_pairs_by_index_and_stops_at_shortest() {
        let rows: Vec<_> = zip(vec![packets("a", &[1, 2, 3]), packets("b", &[10, 20])])
            .collect()
            .await;

        assert_eq!(rows.len(), 2);
        assert_eq!(firsts(&rows[1]), vec![("a".into(), 2.0), ("b".into(), 20.0)]);
    }

    #[tokio::test]
    async fn combine_latest_waits_for_every_source() {
        let rows: Vec<_> = combine_latest(vec![packets("a", &[1]), packets("b", &[])])
            .collect()
            .await;
        assert!(rows.is_empty());

        let rows: Vec<_> = combine_latest(vec![packets("a", &[1]), packets("b", &[2])])
            .collect()
            .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
    }

    #[tokio::test]
    async fn merge_triggers_per_emission() {
        let rows: Vec<_> = merge(vec![packets("a", &[1, 2]), packets("b", &[3])])
            .collect()
            .await;
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 1));
    }

    #[tokio::test]
    async fn with_latest_from_only_fires_on_primary() {
        let other = packets("b", &[5]);
        let primary = stream::once(async {})
            .then(|_| tokio::task::yield_now())
            .flat_map(|_| packets("a", &[1, 2]))
            .boxed();

        let rows: Vec<_> = with_latest_from(vec![primary, other], 0).collect().await;

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.iter().any(|p| p.source == "b")));
    }

    #[tokio::test]
    async fn optional_sources_ride_along_without_triggering() {
        let late = stream::once(async {})
            .then(|_| tokio::task::yield_now())
            .flat_map(|_| packets("b", &[7]))
            .boxed();
        let triggers = merge(vec![packets("a", &[1])]);

        let rows: Vec<_> = attach_optional(triggers, vec![late, packets("c", &[])])
            .collect()
            .await;

        assert_eq!(rows.len(), 1, "only the required source triggers");
        assert_eq!(firsts(&rows[0]), vec![("a".into(), 1.0), ("b".into(), 7.0)]);
    }
}
