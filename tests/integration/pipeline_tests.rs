//! End-to-end pipeline tests against the scripted mock transport.

use std::sync::Arc;

use image::Rgb;
use tokio_util::sync::CancellationToken;

use untiler::error::{FetchReason, ResolveError, ResolveReason, UntileError};
use untiler::io::TileStore;
use untiler::tile::{
    AssembledImage, FetchCoordinator, RemoteTileFetcher, StoredTileFetcher, TileCoordinate,
    TileFetcher, DEFAULT_FILL,
};
use untiler::untiler::{UntileOutcome, Untiler, UntilerOptions};
use untiler::zoomify::{MetadataResolver, ZoomifyResolver};

use super::test_utils::{
    create_png_tile, fast_retry, tile_colour, MockTransport, Reply, TileEncoding, TileSite,
};

const BASE: &str = "http://tiles.test/zoom/";
const PROPERTIES: &str = "http://tiles.test/zoom/ImageProperties.xml";

type MockUntiler = Untiler<ZoomifyResolver<MockTransport>, RemoteTileFetcher<MockTransport>>;

fn untiler_for(transport: Arc<MockTransport>) -> MockUntiler {
    untiler_with(transport, UntilerOptions::default())
}

fn untiler_with(transport: Arc<MockTransport>, options: UntilerOptions) -> MockUntiler {
    let resolver = Arc::new(ZoomifyResolver::new(Arc::clone(&transport)));
    let fetcher = Arc::new(RemoteTileFetcher::new(transport, fast_retry()));
    Untiler::new(resolver, fetcher, options)
}

/// Assert every tile rectangle holds its colour, or the fill if listed.
fn assert_tiles(image: &AssembledImage, site: &TileSite, missing: &[TileCoordinate]) {
    let ts = site.props.tile_size;
    for row in 0..site.props.rows() {
        for col in 0..site.props.columns() {
            let coordinate = TileCoordinate::new(col, row);
            let (w, h) = site.tile_size(coordinate);
            let expected = if missing.contains(&coordinate) {
                DEFAULT_FILL
            } else {
                tile_colour(coordinate)
            };
            for y in row * ts..row * ts + h {
                for x in col * ts..col * ts + w {
                    assert_eq!(
                        *image.canvas.get_pixel(x, y),
                        expected,
                        "pixel ({}, {}) of tile {}",
                        x,
                        y,
                        coordinate
                    );
                }
            }
        }
    }
}

async fn untile(untiler: &MockUntiler) -> UntileOutcome {
    untiler
        .untile(PROPERTIES, CancellationToken::new())
        .await
        .unwrap()
}

// =============================================================================
// Full Pipeline
// =============================================================================

#[tokio::test]
async fn test_full_pipeline_exact_canvas() {
    // 3 x 2 tiles with cut right and bottom edges.
    let site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));

    let outcome = untile(&untiler_for(transport.clone())).await;

    assert_eq!((outcome.image.width(), outcome.image.height()), (600, 300));
    assert!(outcome.image.is_complete());
    assert_tiles(&outcome.image, &site, &[]);

    let report = &outcome.report;
    assert_eq!(report.tiles, 6);
    assert_eq!(report.placed, 6);
    assert_eq!(report.base_url, BASE);
    assert!(!report.cancelled);

    // Properties document plus one request per tile.
    assert_eq!(transport.request_count(), 7);
}

#[tokio::test]
async fn test_concrete_grid_geometry() {
    let site = TileSite::new(1000, 700, 512, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));

    let outcome = untile(&untiler_for(transport)).await;
    assert_eq!((outcome.image.width(), outcome.image.height()), (1000, 700));
    assert_eq!(outcome.report.tiles, 4);
    assert_tiles(&outcome.image, &site, &[]);
}

#[tokio::test]
async fn test_resolve_from_viewer_page() {
    let site = TileSite::new(300, 200, 256, TileEncoding::Png);
    let transport = Arc::new(
        MockTransport::new()
            .serving(BASE, &site)
            .with_body(
                "http://tiles.test/gallery/item.html",
                r#"<param name="FlashVars" value="zoomifyImagePath=/zoom&zoomifyNavigator=1">"#,
            ),
    );

    let outcome = untiler_for(transport)
        .untile("http://tiles.test/gallery/item.html", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.base_url, BASE);
    assert!(outcome.image.is_complete());
}

// =============================================================================
// Retries and Failures
// =============================================================================

#[tokio::test]
async fn test_transient_failures_then_success() {
    let site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let flaky = TileCoordinate::new(1, 0);
    let flaky_url = format!("{}{}", BASE, site.tile_path(flaky));
    let body = site.files[&site.tile_path(flaky)].clone();

    let transport = Arc::new(MockTransport::new().serving(BASE, &site).with_script(
        flaky_url.clone(),
        vec![Reply::Status(503), Reply::Timeout, Reply::Body(body)],
    ));

    let outcome = untile(&untiler_for(transport.clone())).await;

    assert!(outcome.image.is_complete());
    assert!(outcome.report.missing.is_empty());
    assert_eq!(transport.requests_for(&flaky_url), 3);
    assert_tiles(&outcome.image, &site, &[]);
}

#[tokio::test]
async fn test_partial_failure_reports_single_tile() {
    let mut site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let broken = TileCoordinate::new(1, 1);
    let broken_url = format!("{}{}", BASE, site.tile_path(broken));
    site.remove_tile(broken);

    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let outcome = untile(&untiler_for(transport.clone())).await;

    assert_eq!(outcome.image.missing_coordinates(), vec![broken]);
    let failure = &outcome.report.missing[0];
    assert_eq!(failure.reason, FetchReason::NotFound);
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.address, broken_url);

    // 404 is permanent: no retries.
    assert_eq!(transport.requests_for(&broken_url), 1);
    assert_tiles(&outcome.image, &site, &[broken]);
}

#[tokio::test]
async fn test_exhausted_retries_reported_as_server_error() {
    let site = TileSite::new(300, 200, 256, TileEncoding::Png);
    let tile = TileCoordinate::new(0, 0);
    let url = format!("{}{}", BASE, site.tile_path(tile));

    let transport = Arc::new(
        MockTransport::new()
            .serving(BASE, &site)
            .with_script(url.clone(), vec![Reply::Status(500)]),
    );
    let outcome = untile(&untiler_for(transport.clone())).await;

    assert_eq!(outcome.report.missing.len(), 1);
    assert_eq!(outcome.report.missing[0].reason, FetchReason::ServerError);
    assert_eq!(outcome.report.missing[0].attempts, 3);
    assert_eq!(transport.requests_for(&url), 3);
}

#[tokio::test]
async fn test_wrong_sized_tile_is_corrupt() {
    let mut site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let edge = TileCoordinate::new(2, 1);
    let path = site.tile_path(edge);
    site.files
        .insert(path, create_png_tile(256, 256, Rgb([255, 255, 255])));

    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let outcome = untile(&untiler_for(transport)).await;

    assert_eq!(outcome.image.missing_coordinates(), vec![edge]);
    assert_eq!(outcome.report.missing[0].reason, FetchReason::Corrupt);
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_missing_tile_size_stops_before_fetching() {
    let mut site = TileSite::new(600, 300, 256, TileEncoding::Png);
    site.set_properties(r#"<IMAGE_PROPERTIES WIDTH="600" HEIGHT="300" NUMTILES="6"/>"#);

    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let err = untiler_for(transport.clone())
        .untile(PROPERTIES, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UntileError::Resolve(e) => {
            assert_eq!(e.reason(), ResolveReason::MissingField);
            assert!(matches!(e, ResolveError::MissingField("TILESIZE")));
        }
        other => panic!("expected a resolve error, got {:?}", other),
    }

    // Only the properties document was requested.
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_invalid_dimensions_stop_before_fetching() {
    for document in [
        r#"<IMAGE_PROPERTIES WIDTH="600" HEIGHT="300" TILESIZE="0"/>"#,
        r#"<IMAGE_PROPERTIES WIDTH="4294967295" HEIGHT="4294967295" TILESIZE="4294967295"/>"#,
    ] {
        let mut site = TileSite::new(600, 300, 256, TileEncoding::Png);
        site.set_properties(document);

        let transport = Arc::new(MockTransport::new().serving(BASE, &site));
        let err = untiler_for(transport.clone())
            .untile(PROPERTIES, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, UntileError::Resolve(ref e) if e.reason() == ResolveReason::MalformedDocument),
            "{}: {:?}",
            document,
            err
        );
        assert_eq!(transport.request_count(), 1);
    }
}

#[tokio::test]
async fn test_unreachable_properties_document() {
    let transport = Arc::new(MockTransport::new());
    let err = untiler_for(transport.clone())
        .untile(PROPERTIES, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UntileError::Resolve(ref e) if e.reason() == ResolveReason::Unreachable));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_resolver_trait_object() {
    let site = TileSite::new(300, 200, 256, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let resolver: Arc<dyn MetadataResolver> = Arc::new(ZoomifyResolver::new(transport));

    let resolved = resolver.resolve(PROPERTIES).await.unwrap();
    assert_eq!(resolved.properties.width, 300);
    assert_eq!(resolved.base_url.as_str(), BASE);
}

// =============================================================================
// Determinism, Cancellation, Tiers
// =============================================================================

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let site = TileSite::new(700, 500, 256, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let untiler = untiler_with(
        transport,
        UntilerOptions {
            concurrency: 3,
            ..UntilerOptions::default()
        },
    );

    let first = untile(&untiler).await;
    let second = untile(&untiler).await;
    assert_eq!(first.image.canvas.as_raw(), second.image.canvas.as_raw());
}

#[tokio::test]
async fn test_cancelled_run_marks_tiles_aborted() {
    let site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = untiler_for(transport.clone())
        .untile(PROPERTIES, cancel)
        .await
        .unwrap();

    assert!(outcome.report.cancelled);
    assert_eq!(outcome.report.missing.len(), 6);
    assert!(outcome
        .report
        .missing
        .iter()
        .all(|e| e.reason == FetchReason::Aborted));
    assert!(outcome.image.canvas.pixels().all(|p| *p == DEFAULT_FILL));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_lower_tier_selection() {
    let mut site = TileSite::new(600, 300, 256, TileEncoding::Png);
    // Tiers: 150x75 (1 tile), 300x150 (2x1), 600x300 (3x2).
    site.files.insert(
        "TileGroup0/0-0-0.jpg".to_string(),
        create_png_tile(150, 75, Rgb([1, 2, 3])),
    );

    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let untiler = untiler_with(
        transport,
        UntilerOptions {
            tier: Some(0),
            ..UntilerOptions::default()
        },
    );

    let outcome = untile(&untiler).await;
    assert_eq!(outcome.report.tier, 0);
    assert_eq!(outcome.report.tier_count, 3);
    assert_eq!((outcome.image.width(), outcome.image.height()), (150, 75));
    assert!(outcome.image.canvas.pixels().all(|p| *p == Rgb([1, 2, 3])));
}

#[tokio::test]
async fn test_out_of_range_tier_falls_back_to_full_resolution() {
    let site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let untiler = untiler_with(
        transport,
        UntilerOptions {
            tier: Some(9),
            ..UntilerOptions::default()
        },
    );

    let outcome = untile(&untiler).await;
    assert_eq!(outcome.report.tier, 2);
    assert_eq!((outcome.image.width(), outcome.image.height()), (600, 300));
}

#[tokio::test]
async fn test_tile_template() {
    let site = TileSite::new(300, 200, 256, TileEncoding::Png);
    let mut transport = MockTransport::new().with_body(
        PROPERTIES,
        site.files["ImageProperties.xml"].clone(),
    );
    for col in 0..2 {
        let coordinate = TileCoordinate::new(col, 0);
        let (w, h) = site.tile_size(coordinate);
        transport = transport.with_body(
            format!("http://tiles.test/zoom/custom/{}_0.png", col),
            create_png_tile(w, h, tile_colour(coordinate)),
        );
    }

    let untiler = untiler_with(
        Arc::new(transport),
        UntilerOptions {
            template: Some("custom/{col}_{row}.png".to_string()),
            ..UntilerOptions::default()
        },
    );

    let outcome = untile(&untiler).await;
    assert!(outcome.image.is_complete());
    assert_tiles(&outcome.image, &site, &[]);
}

// =============================================================================
// Tile Store
// =============================================================================

#[tokio::test]
async fn test_stored_tiles_reassemble_offline() {
    let dir = std::env::temp_dir().join(format!("untiler-it-store-{}", std::process::id()));
    let store = TileStore::new(&dir);
    store.ensure_dir().await.unwrap();

    let site = TileSite::new(600, 300, 256, TileEncoding::Png);
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));
    let resolver = Arc::new(ZoomifyResolver::new(Arc::clone(&transport)));

    let online: Arc<dyn TileFetcher> = Arc::new(
        RemoteTileFetcher::new(Arc::clone(&transport), fast_retry()).with_store(store.clone()),
    );
    let first = Untiler::new(Arc::clone(&resolver), online, UntilerOptions::default())
        .untile(PROPERTIES, CancellationToken::new())
        .await
        .unwrap();

    let before = transport.request_count();
    let offline: Arc<dyn TileFetcher> = Arc::new(StoredTileFetcher::new(store));
    let second = Untiler::new(resolver, offline, UntilerOptions::default())
        .untile(PROPERTIES, CancellationToken::new())
        .await
        .unwrap();

    // Only the properties document is fetched again.
    assert_eq!(transport.request_count(), before + 1);
    assert!(second.image.is_complete());
    assert_eq!(first.image.canvas.as_raw(), second.image.canvas.as_raw());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_coordinator_reports_every_tile_once() {
    let mut site = TileSite::new(900, 600, 128, TileEncoding::Png);
    site.remove_tile(TileCoordinate::new(3, 2));
    let transport = Arc::new(MockTransport::new().serving(BASE, &site));

    let resolver = ZoomifyResolver::new(Arc::clone(&transport));
    let resolved = resolver.resolve(PROPERTIES).await.unwrap();
    let pyramid = resolved.pyramid();
    let builder =
        untiler::zoomify::ZoomifyAddressBuilder::new(&resolved.base_url, &pyramid, pyramid.max_tier())
            .unwrap();
    let descriptors = untiler::tile::plan(&resolved.properties, &builder);
    assert_eq!(descriptors.len(), 8 * 5);

    let coordinator =
        FetchCoordinator::new(Arc::new(RemoteTileFetcher::new(transport, fast_retry())), 5);
    let results = coordinator.run(descriptors).await;

    assert_eq!(results.len(), 40);
    let mut coordinates: Vec<_> = results.iter().map(|r| r.descriptor.coordinate).collect();
    coordinates.sort();
    coordinates.dedup();
    assert_eq!(coordinates.len(), 40);

    let failed: Vec<_> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.descriptor.coordinate)
        .collect();
    assert_eq!(failed, vec![TileCoordinate::new(3, 2)]);
}
