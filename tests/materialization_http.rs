//! Materialization client and live queries against an in-process HTTP server

mod common;

use caveclient::client::{MaterializationClient, MetadataCache, Session, DEFAULT_TIMEOUT};
use caveclient::timestamp::to_unix_seconds;
use caveclient::{
    CaveClient, CaveError, CellValue, ClientConfig, InMemoryLineage, QueryFilters, TableQuery,
    ValidationError,
};
use common::{day, le_ids, read_le_ids, MockServer, Reply};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DATASTACK: &str = "minnie65_public";
const VERSIONS: &str = "/materialize/api/v2/datastack/minnie65_public/metadata";
const QUERY: &str = "/materialize/api/v3/datastack/minnie65_public/version/1/table/synapses/query";
const TABLE_METADATA: &str =
    "/materialize/api/v3/datastack/minnie65_public/version/1/table/synapses/metadata";
const CG: &str = "/segmentation/api/v1/table/minnie3_v1";

fn versions_reply() -> Reply {
    Reply::json(json!([
        {
            "version": 1,
            "id": 10,
            "time_stamp": "2024-01-03T00:00:00.000000",
            "expires_on": "2024-02-03T00:00:00.000000",
            "valid": true,
            "status": "AVAILABLE",
            "datastack": DATASTACK
        },
        {
            "version": 2,
            "id": 20,
            "time_stamp": "2024-01-20T00:00:00.000000",
            "expires_on": null,
            "valid": true,
            "status": "AVAILABLE",
            "datastack": DATASTACK
        }
    ]))
}

/// Two synapses made by roots 100 and 101 before they merged into 200
fn synapse_rows() -> Value {
    json!([
        {"id": 1, "pre_pt_supervoxel_id": 1, "pre_pt_root_id": 100, "size": 120},
        {"id": 2, "pre_pt_supervoxel_id": 2, "pre_pt_root_id": 101, "size": 80}
    ])
}

fn merge_history() -> InMemoryLineage {
    InMemoryLineage::new()
        .with_root(100, day(1), &[1])
        .with_root(101, day(1), &[2])
        .with_merge(&[100, 101], 200, day(5))
}

async fn materialize(server: &MockServer, cache: Arc<MetadataCache>) -> MaterializationClient {
    let session = Session::new(Some("secret-token".into()), DEFAULT_TIMEOUT).unwrap();
    MaterializationClient::connect(session, server.url(), DATASTACK, cache, Some(3))
        .await
        .unwrap()
}

async fn fresh_client(server: &MockServer) -> MaterializationClient {
    materialize(server, Arc::new(MetadataCache::default())).await
}

mod metadata_cache {
    use super::*;

    #[tokio::test]
    async fn repeated_version_lookup_is_served_from_cache() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        let client = fresh_client(&server).await;

        let first = client.versions_metadata(false).await.unwrap();
        let second = client.versions_metadata(false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].time_stamp, day(3));
        assert_eq!(first[1].expires_on, None);
        assert_eq!(server.requests_to("/metadata").len(), 1);
        assert!(server.requests()[0].has_query("expired", "false"));
    }

    #[tokio::test]
    async fn expired_flag_is_part_of_the_key() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        let client = fresh_client(&server).await;

        client.versions_metadata(false).await.unwrap();
        client.versions_metadata(true).await.unwrap();
        assert_eq!(server.requests_to("/metadata").len(), 2);
    }

    #[tokio::test]
    async fn clients_share_only_an_injected_cache() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());

        let shared = Arc::new(MetadataCache::default());
        let a = materialize(&server, Arc::clone(&shared)).await;
        let b = materialize(&server, Arc::clone(&shared)).await;
        a.versions_metadata(false).await.unwrap();
        b.versions_metadata(false).await.unwrap();
        assert_eq!(server.requests_to("/metadata").len(), 1);

        let separate = fresh_client(&server).await;
        separate.versions_metadata(false).await.unwrap();
        assert_eq!(server.requests_to("/metadata").len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_fetched_again() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        let client = materialize(&server, Arc::new(MetadataCache::new(Duration::ZERO))).await;

        client.versions_metadata(false).await.unwrap();
        client.versions_metadata(false).await.unwrap();
        assert_eq!(server.requests_to("/metadata").len(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let server = MockServer::start();
        server.route_once("GET", VERSIONS, Reply::status(500));
        server.route("GET", VERSIONS, versions_reply());
        let client = fresh_client(&server).await;

        assert!(client.versions_metadata(false).await.is_err());
        assert_eq!(client.versions_metadata(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn table_metadata_folds_voxel_resolution() {
        let server = MockServer::start();
        server.route(
            "GET",
            TABLE_METADATA,
            Reply::json(json!({
                "table_name": "synapses",
                "schema": "synapse",
                "reference_table": "",
                "voxel_resolution_x": 4.0,
                "voxel_resolution_y": 4.0,
                "voxel_resolution_z": 40.0
            })),
        );
        let client = fresh_client(&server).await;

        let md = client.table_metadata("synapses", 1).await.unwrap();
        assert_eq!(md.schema_type.as_deref(), Some("synapse"));
        assert_eq!(md.reference_table, None);
        assert_eq!(md.voxel_resolution, Some([4.0, 4.0, 40.0]));
        client.table_metadata("synapses", 1).await.unwrap();
        assert_eq!(server.requests().len(), 1);
    }
}

mod query_table {
    use super::*;

    #[tokio::test]
    async fn filters_are_nested_under_the_table_name() {
        let server = MockServer::start();
        server.route("POST", QUERY, Reply::json(synapse_rows()));
        let client = fresh_client(&server).await;

        let query = TableQuery::new("synapses")
            .with_filters(
                QueryFilters::new()
                    .equal("cell_type", "BC")
                    .one_of("pre_pt_root_id", [100u64, 101])
                    .exclude("post_pt_root_id", [0u64])
                    .matching("tag", "^axon"),
            )
            .select(["id", "pre_pt_root_id"])
            .limit(10);
        let table = client.query_table(&query, 1).await.unwrap();
        assert_eq!(table.len(), 2);

        let sent = &server.requests()[0];
        assert_eq!(sent.method, "POST");
        assert!(sent.has_query("return_pyarrow", "false"));
        assert!(sent.has_query("split_positions", "true"));
        assert_eq!(sent.authorization.as_deref(), Some("Bearer secret-token"));
        assert_eq!(
            sent.json(),
            json!({
                "filter_equal_dict": {"synapses": {"cell_type": "BC"}},
                "filter_in_dict": {"synapses": {"pre_pt_root_id": [100, 101]}},
                "filter_notin_dict": {"synapses": {"post_pt_root_id": [0]}},
                "filter_regex_dict": {"synapses": {"tag": "^axon"}},
                "select_columns": ["id", "pre_pt_root_id"],
                "limit": 10
            })
        );
    }

    #[tokio::test]
    async fn empty_one_of_returns_empty_table_without_a_request() {
        let server = MockServer::start();
        let client = fresh_client(&server).await;

        let query = TableQuery::new("synapses")
            .with_filters(QueryFilters::new().one_of("pre_pt_root_id", Vec::<u64>::new()))
            .select(["id", "pre_pt_root_id"]);
        let table = client.query_table(&query, 1).await.unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns(), ["id", "pre_pt_root_id"]);
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn positions_are_rescaled_from_table_metadata() {
        let server = MockServer::start();
        server.route(
            "POST",
            QUERY,
            Reply::json(json!([
                {"id": 1, "pt_position_x": 100, "pt_position_y": 200, "pt_position_z": 10}
            ])),
        );
        server.route(
            "GET",
            TABLE_METADATA,
            Reply::json(json!({
                "voxel_resolution_x": 4.0,
                "voxel_resolution_y": 4.0,
                "voxel_resolution_z": 40.0
            })),
        );
        let client = fresh_client(&server).await;

        let query = TableQuery::new("synapses").desired_resolution([8.0, 8.0, 40.0]);
        let table = client.query_table(&query, 1).await.unwrap();
        assert_eq!(
            table.rows()[0]["pt_position"],
            CellValue::Array(vec![
                CellValue::Float(50.0),
                CellValue::Float(100.0),
                CellValue::Float(10.0)
            ])
        );
        assert_eq!(server.requests_to("/metadata").len(), 1);
    }

    #[tokio::test]
    async fn server_scaled_positions_are_left_alone() {
        let server = MockServer::start();
        server.route(
            "POST",
            QUERY,
            Reply::json(json!([
                {"id": 1, "pt_position_x": 50, "pt_position_y": 100, "pt_position_z": 10}
            ]))
            .with_header("dataframe_resolution", "8, 8, 40"),
        );
        let client = fresh_client(&server).await;

        let query = TableQuery::new("synapses")
            .desired_resolution([8.0, 8.0, 40.0])
            .split_positions(true);
        let table = client.query_table(&query, 1).await.unwrap();
        assert_eq!(table.rows()[0]["pt_position_x"], CellValue::UInt(50));
        assert!(server.requests_to("/metadata").is_empty());
    }

    #[tokio::test]
    async fn non_list_response_is_a_decode_error() {
        let server = MockServer::start();
        server.route("POST", QUERY, Reply::json(json!({"rows": []})));
        let client = fresh_client(&server).await;
        let err = client
            .query_table(&TableQuery::new("synapses"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CaveError::Decode(_)));
    }
}

mod live_query {
    use super::*;

    async fn client_with(server: &MockServer, lineage: Arc<InMemoryLineage>) -> MaterializationClient {
        fresh_client(server).await.with_lineage(lineage)
    }

    fn by_root(root: u64) -> TableQuery {
        TableQuery::new("synapses").with_filters(QueryFilters::new().equal("pre_pt_root_id", root))
    }

    #[tokio::test]
    async fn snapshot_time_queries_directly() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        server.route("POST", QUERY, Reply::json(synapse_rows()));
        let lineage = Arc::new(merge_history());
        let client = client_with(&server, Arc::clone(&lineage)).await;

        let result = client.live_query(&by_root(100), day(3), true).await.unwrap();
        assert_eq!(result.snapshot.version, 1);
        assert_eq!(result.past_filters, by_root(100).filters);
        assert_eq!(lineage.calls().total(), 0);
        assert_eq!(
            server.requests_to("/query")[0].json()["filter_equal_dict"],
            json!({"synapses": {"pre_pt_root_id": 100}})
        );
    }

    #[tokio::test]
    async fn later_time_is_mapped_onto_the_snapshot() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        server.route("POST", QUERY, Reply::json(synapse_rows()));
        let lineage = Arc::new(merge_history());
        let client = client_with(&server, Arc::clone(&lineage)).await;

        let result = client.live_query(&by_root(200), day(7), true).await.unwrap();
        assert_eq!(result.snapshot.version, 1);

        let sent = server.requests_to("/query")[0].json();
        assert_eq!(
            sent["filter_in_dict"],
            json!({"synapses": {"pre_pt_root_id": [100, 101]}})
        );
        assert!(sent.get("filter_equal_dict").is_none());

        let roots: Vec<&CellValue> = result.table.column_values("pre_pt_root_id").collect();
        assert_eq!(roots, vec![&CellValue::UInt(200), &CellValue::UInt(200)]);
        assert_eq!(result.table.rows()[1]["size"], CellValue::UInt(80));
    }

    #[tokio::test]
    async fn time_before_every_version_is_rejected() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        let lineage = Arc::new(merge_history());
        let client = client_with(&server, Arc::clone(&lineage)).await;

        let err = client.live_query(&by_root(100), day(2), true).await.unwrap_err();
        assert!(matches!(
            err,
            CaveError::Validation(ValidationError::NoVersionBefore(_))
        ));
        assert!(server.requests_to("/query").is_empty());
        assert_eq!(lineage.calls().total(), 0);
    }

    #[tokio::test]
    async fn root_column_without_supervoxel_is_rejected_up_front() {
        let server = MockServer::start();
        let client = client_with(&server, Arc::new(merge_history())).await;

        let query = by_root(200).select(["id", "pre_pt_root_id"]);
        let err = client.live_query(&query, day(7), true).await.unwrap_err();
        assert!(matches!(
            err,
            CaveError::Validation(ValidationError::RootWithoutSupervoxel(_))
        ));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn requires_a_lineage_oracle() {
        let server = MockServer::start();
        let client = fresh_client(&server).await;
        let err = client.live_query(&by_root(100), day(7), true).await.unwrap_err();
        assert!(matches!(err, CaveError::Config(_)));
    }

    #[tokio::test]
    async fn expired_root_is_rejected_before_querying() {
        let server = MockServer::start();
        server.route("GET", VERSIONS, versions_reply());
        let client = client_with(&server, Arc::new(merge_history())).await;

        let err = client.live_query(&by_root(100), day(7), true).await.unwrap_err();
        match err {
            CaveError::Validation(ValidationError::IncompatibleRoots { expired, too_recent }) => {
                assert_eq!(expired.len(), 1);
                assert!(too_recent.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(server.requests_to("/query").is_empty());
    }
}

/// Full stack: info lookup, version negotiation and HTTP lineage on one server
#[tokio::test]
async fn cave_client_answers_a_live_query_end_to_end() {
    let server = MockServer::start();
    let base = server.url().as_str().trim_end_matches('/').to_string();
    server.route(
        "GET",
        "/info/api/v2/datastack/full/minnie65_public",
        Reply::json(json!({
            "segmentation_source": format!("graphene://{base}/segmentation/table/minnie3_v1"),
            "local_server": base,
            "aligned_volume": {"name": "minnie65_phase3", "id": 1},
            "synapse_table": "synapses"
        })),
    );
    server.route("GET", "/segmentation/api/versions", Reply::json(json!([1])));
    server.route("GET", "/materialize/api/versions", Reply::json(json!([2, 3])));
    server.route("GET", VERSIONS, versions_reply());
    server.route("POST", QUERY, Reply::json(synapse_rows()));
    // validity check of the requested root, then staleness of the returned ones
    server.route_once(
        "POST",
        &format!("{CG}/is_latest_roots"),
        Reply::json(json!({"is_latest": [true]})),
    );
    server.route_once(
        "POST",
        &format!("{CG}/is_latest_roots"),
        Reply::json(json!({"is_latest": [false, false]})),
    );
    server.route(
        "POST",
        &format!("{CG}/root_timestamps"),
        Reply::json(json!({"timestamp": [to_unix_seconds(day(5))]})),
    );
    server.route(
        "GET",
        &format!("{CG}/past_id_mapping"),
        Reply::json(json!({"past_id_map": {"200": [101, 100]}, "future_id_map": {}})),
    );
    server.route(
        "POST",
        &format!("{CG}/roots_binary"),
        Reply::bytes(le_ids(&[200, 200])),
    );

    let config = ClientConfig {
        server_address: base.clone(),
        ..ClientConfig::default()
    }
    .with_datastack(DATASTACK)
    .with_token("secret-token");
    let client = CaveClient::connect(&config).await.unwrap();
    assert_eq!(client.chunkedgraph.table_id(), "minnie3_v1");
    assert_eq!(client.datastack.synapse_table.as_deref(), Some("synapses"));

    let query = TableQuery::new("synapses")
        .with_filters(QueryFilters::new().equal("pre_pt_root_id", 200u64));
    let result = client.materialize.live_query(&query, day(7), true).await.unwrap();

    assert_eq!(result.table.len(), 2);
    assert!(result
        .table
        .column_values("pre_pt_root_id")
        .all(|v| *v == CellValue::UInt(200)));
    assert_eq!(result.past_filters.include["pre_pt_root_id"].values().len(), 2);

    let lookup = &server.requests_to("roots_binary")[0];
    assert_eq!(read_le_ids(&lookup.body), vec![1, 2]);
    assert!(server
        .requests()
        .iter()
        .all(|r| r.authorization.as_deref() == Some("Bearer secret-token")));
}
