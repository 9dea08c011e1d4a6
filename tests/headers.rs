use federation::{
    message::{Header, RoutingTokenHeader},
    Error, NodeIdRange, NodeInstance, NodePhase,
};

mod common;
#[allow(unused_imports)]
use crate::common::{bootstrapped, enable_tracing, header, id, join, table};

fn token_header() -> Header {
    Header::RoutingToken(RoutingTokenHeader::new(NodeIdRange::FULL, 1, 0))
}

#[test]
fn duplicate_range_is_rejected() {
    let mut table = bootstrapped(500, 2);
    let from = NodeInstance::new(id(510), 1);
    let headers = vec![
        Header::PartnerNode(header(510, 1, NodePhase::Inserting)),
        Header::NeighborhoodRange(NodeIdRange::FULL),
        Header::NeighborhoodRange(NodeIdRange::FULL),
    ];

    let result = table.process_neighbor_headers(&headers, from, true, true);
    assert_eq!(
        result,
        Err(Error::DuplicateNeighborhoodRange(from.to_string()))
    );
    // Nothing was applied.
    assert!(table.get(id(510)).is_none());
}

#[test]
fn too_many_tokens_are_rejected() {
    let mut table = bootstrapped(500, 2);
    let from = NodeInstance::new(id(510), 1);

    let headers = vec![token_header(), token_header()];
    assert!(table
        .process_neighbor_headers(&headers, from, false, true)
        .is_ok());

    let headers = vec![token_header(), token_header(), token_header()];
    let result = table.process_neighbor_headers(&headers, from, false, true);
    assert!(matches!(
        result,
        Err(Error::TooManyRoutingTokens { count: 3, .. })
    ));
}

#[test]
fn outbound_headers() {
    let mut table = bootstrapped(500, 2);
    join(&mut table, 490);
    join(&mut table, 510);

    let headers = table.add_neighbor_headers(None);
    let kinds: Vec<_> = headers.iter().map(|header| header.variant_as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "partner_node",
            "partner_node",
            "partner_node",
            "neighborhood_range",
            "neighborhood_version"
        ]
    );

    assert_eq!(headers[0], Header::PartnerNode(table.local_node().header()));
    assert_eq!(headers[3], Header::NeighborhoodRange(table.hood_range()));
    assert_eq!(
        headers[4],
        Header::NeighborhoodVersion(table.neighborhood_version())
    );

    // The peer's version is echoed back.
    let headers = table.add_neighbor_headers(Some(42));
    assert_eq!(headers.last(), Some(&Header::NeighborhoodVersion(42)));
}

#[test]
fn outbound_headers_before_routing() {
    // No range until the neighborhood is known to be consistent.
    let table = table(500, 2);
    let headers = table.add_neighbor_headers(None);
    assert_eq!(headers.len(), 2);
    assert_eq!(headers[1], Header::NeighborhoodVersion(0));
}

#[test]
fn outbound_headers_when_shut_down() {
    let mut table = bootstrapped(500, 2);
    join(&mut table, 490);
    table.change_phase(NodePhase::Shutdown);

    let headers = table.add_neighbor_headers(None);
    assert_eq!(headers.len(), 2);
    assert!(matches!(
        &headers[0],
        Header::PartnerNode(node) if node.phase == NodePhase::Shutdown
    ));
}

#[test]
fn exchange_between_tables() {
    // enable_tracing();

    let mut a = bootstrapped(500, 2);
    join(&mut a, 490);

    // 490 learns about 500 and its neighborhood.
    let mut b = table(490, 2);
    let headers = a.add_neighbor_headers(None);
    let outcome = b
        .process_neighbor_headers(&headers, a.local_node().instance(), false, true)
        .unwrap();

    assert_eq!(outcome.from.unwrap().id(), id(500));
    assert!(b.get(id(500)).unwrap().is_routing());
    // Its own entry, as relayed by 500, is left alone.
    assert_eq!(b.local_node().phase(), NodePhase::Booting);
}

#[test]
fn unmatched_message_is_not_validated() {
    let mut table = bootstrapped(500, 2);
    let from = NodeInstance::new(id(510), 1);
    let headers = vec![
        Header::PartnerNode(header(510, 1, NodePhase::Inserting)),
        Header::NeighborhoodRange(NodeIdRange::FULL),
        Header::NeighborhoodRange(NodeIdRange::FULL),
        token_header(),
        token_header(),
        token_header(),
    ];

    // Addressed to an older instance: ranges and tokens are skipped, the node header still counts.
    let outcome = table
        .process_neighbor_headers(&headers, from, true, false)
        .unwrap();
    assert!(outcome.rejected_tokens.is_empty());
    assert_eq!(outcome.from.unwrap().id(), id(510));
    assert_eq!(table.local_node().token().range(), NodeIdRange::FULL);
}
