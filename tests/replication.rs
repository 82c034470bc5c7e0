use futures::future::join_all;
use netds::data::{Pattern, VolumeSpec};
use netds::{LocalCommunicator, NetDsClient, NetDsServer, ServerConfig, ViewTransform};
use tokio::net::TcpListener;

fn config(source_rank: i32) -> ServerConfig {
    ServerConfig {
        source_rank,
        volumes: vec![VolumeSpec {
            name: "volume.uvf".to_string(),
            dimensions: [32, 32, 32],
            brick_size: [16, 16, 16],
            pattern: Pattern::Checker,
        }],
        max_batch_size: 3,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn ranks_follow_a_sequence_of_clients() {
    let source_rank = 1;
    let mut servers: Vec<_> = LocalCommunicator::group(4)
        .into_iter()
        .map(|comm| NetDsServer::from_config(comm, &config(source_rank)))
        .collect();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let clients = async move {
        {
            let mut first = NetDsClient::connect(addr).await.unwrap();
            assert_eq!(first.open("missing.uvf").await.unwrap().brick_count(), 0);
            let catalog = first.open("volume.uvf").await.unwrap();
            assert_eq!(catalog.brick_count(), 9);
            first.set_batch_size(2).await.unwrap();
            let batches = first.rotate::<u8>(&ViewTransform::identity()).await.unwrap();
            assert_eq!(batches.len(), 4);
        }

        let mut second = NetDsClient::connect(addr).await.unwrap();
        second.open("volume.uvf").await.unwrap();
        let batches = second.rotate::<u32>(&ViewTransform::identity()).await.unwrap();
        assert_eq!(batches.iter().map(|b| b.bricks.len()).collect::<Vec<_>>(), vec![3, 3, 2]);
        assert_eq!(second.brick::<u16>(1, 0).await.unwrap().len(), 16 * 16 * 16);
        second.shutdown().await.unwrap();
    };

    let mut listener = Some(listener);
    let ranks = join_all(servers.iter_mut().map(|server| {
        let listener = if server.is_source() { listener.take() } else { None };
        async move {
            match listener {
                Some(listener) => server.serve(listener).await,
                None => server.follow().await,
            }
        }
    }));

    let (results, ()) = tokio::join!(ranks, clients);
    for (rank, result) in results.into_iter().enumerate() {
        assert!(result.is_ok(), "rank {} failed: {:?}", rank, result);
    }
    assert!(servers.iter().all(|s| s.performer().open_name().is_none()));
    assert!(servers.iter().all(|s| s.performer().max_batch_size() == 3));
}
