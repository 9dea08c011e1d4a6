use federation::{
    message::{Header, RoutingTokenHeader},
    NodeIdRange, NodeInstance, NodePhase,
};

mod common;
#[allow(unused_imports)]
use crate::common::{bootstrapped, enable_tracing, header, id, join, table};

#[test]
fn splits_compose() {
    let mut table = bootstrapped(256, 2);
    join(&mut table, 128);
    join(&mut table, 384);
    assert_eq!(table.local_node().token().version(), 1);

    assert_eq!(table.try_split_token(id(128)).len(), 1);
    assert_eq!(table.try_split_token(id(384)).len(), 1);

    let token = table.local_node().token();
    assert_eq!(token.version(), 3);
    assert_eq!(token.range(), NodeIdRange::new(id(193), id(320)));

    // Nothing left to give.
    assert!(table.try_split_token(id(384)).is_empty());
    assert!(table.try_split_token(id(256)).is_empty());
    assert!(table.try_split_token(id(999)).is_empty());
    assert_eq!(table.local_node().token().version(), 3);
}

#[test]
fn joining_node_accepts_split() {
    let mut seed = bootstrapped(256, 2);
    join(&mut seed, 128);
    let transfers = seed.try_split_token(id(128));

    let mut joiner = table(128, 2);
    let mut headers = vec![Header::PartnerNode(seed.local_node().header())];
    headers.extend(transfers.into_iter().map(Header::RoutingToken));

    let outcome = joiner
        .process_neighbor_headers(&headers, seed.local_node().instance(), false, true)
        .unwrap();

    assert!(outcome.rejected_tokens.is_empty());
    assert_eq!(outcome.from.unwrap().id(), id(256));

    let joined = joiner.local_node().token();
    let kept = seed.local_node().token();
    assert_eq!(joined.version(), 1);
    assert!(joined.contains(id(128)));
    assert!(joined.range().disjoint(&kept.range()));
    assert_eq!(joined.range().merge(&kept.range()), Some(NodeIdRange::FULL));
}

#[test]
fn stale_transfer_is_rejected() {
    let mut table = table(128, 2);
    let transfer = RoutingTokenHeader::new(NodeIdRange::new(id(100), id(200)), 4, 7);
    let headers = vec![Header::RoutingToken(transfer)];

    let outcome = table
        .process_neighbor_headers(&headers, NodeInstance::new(id(256), 0), false, true)
        .unwrap();

    assert_eq!(outcome.rejected_tokens, vec![transfer]);
    assert!(outcome.from.is_none());
    assert!(table.local_node().token().is_empty());

    // Transfers addressed to a previous incarnation are not even looked at.
    let outcome = table
        .process_neighbor_headers(&headers, NodeInstance::new(id(256), 0), false, false)
        .unwrap();
    assert!(outcome.rejected_tokens.is_empty());
}

#[test]
fn depart_hands_token_to_neighbors() {
    let mut table = bootstrapped(256, 2);
    join(&mut table, 128);
    join(&mut table, 384);
    table.try_split_token(id(128));
    table.try_split_token(id(384));

    let departs = table.create_depart_headers();
    assert_eq!(departs.len(), 2);

    let (to_pred, pred_tokens) = &departs[0];
    assert_eq!(to_pred.id, id(128));
    assert_eq!(pred_tokens.len(), 1);
    assert_eq!(pred_tokens[0].range(), NodeIdRange::new(id(193), id(256)));

    let (to_succ, succ_tokens) = &departs[1];
    assert_eq!(to_succ.id, id(384));
    assert_eq!(succ_tokens.len(), 1);
    assert_eq!(succ_tokens[0].range(), NodeIdRange::new(id(257), id(320)));

    assert!(table.local_node().token().is_empty());
}

#[test]
fn release_only_to_routing_neighbors() {
    let mut table = bootstrapped(256, 2);
    join(&mut table, 128);
    join(&mut table, 384);
    join(&mut table, 500);
    table.try_split_token(id(128));
    table.try_split_token(id(384));

    assert!(table.try_release_token(id(500)).is_empty());
    assert_eq!(table.try_release_token(id(384)).len(), 1);
    assert_eq!(
        table.local_node().token().range(),
        NodeIdRange::new(id(193), id(256))
    );
}

#[test]
fn liveness_inside_local_token() {
    let mut table = bootstrapped(256, 2);
    table.consider(&header(300, 0, NodePhase::Joining), false);

    // 300 can't be alive in a range the local node owns.
    assert!(!table.check_liveness(&header(300, 0, NodePhase::Joining)));
    assert!(table.get(id(300)).unwrap().is_shutdown());
    assert!(table.check_liveness(&table.local_node().header()));
}
