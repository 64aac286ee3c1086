use comms::{
    Communicator, TcpGroup,
    msg::{Command, Msg, Payload},
};
use tokio::io;

#[tokio::test]
async fn send_recv_tensor() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let grad = [0.5f32, -1.25, 3.0];
    tx.send(&Msg::Data(Payload::Partial(&grad))).await.unwrap();
    tx.send(&Msg::Control(Command::Barrier)).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf: Vec<f32> = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Partial(got)) => assert_eq!(got, grad),
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(cmd) => assert_eq!(cmd, Command::Barrier),
        other => panic!("unexpected msg: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_group_collectives() {
    const WORLD: usize = 3;
    const ADDR: &str = "127.0.0.1:39517";

    let ranks = (0..WORLD).map(|rank| {
        tokio::spawn(async move {
            let mut group = TcpGroup::connect(rank, WORLD, ADDR).await?;

            let mut grad = vec![rank as f32; 4];
            group.all_reduce_mean(&mut grad).await?;

            let mut params = vec![rank as f32 + 7.0; 2];
            group.broadcast(&mut params).await?;

            group.barrier().await?;
            group.close().await;
            std::io::Result::Ok((grad, params))
        })
    });

    let results = futures::future::join_all(ranks).await;

    for result in results {
        let (grad, params) = result.unwrap().unwrap();
        assert_eq!(grad, vec![1.0; 4]);
        assert_eq!(params, vec![7.0; 2]);
    }
}

#[tokio::test]
async fn tcp_group_rejects_out_of_range_rank() {
    let err = TcpGroup::connect(3, 2, "127.0.0.1:39518").await.err().unwrap();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

/// Runs one collective on every rank of a fresh group, rank 2 passing a longer buffer.
async fn run_mismatched(addr: &'static str, broadcast: bool) -> Vec<std::io::ErrorKind> {
    const WORLD: usize = 3;

    let ranks = (0..WORLD).map(|rank| {
        tokio::spawn(async move {
            let mut group = TcpGroup::connect(rank, WORLD, addr).await?;
            let mut buf = vec![1.0; if rank == 2 { 5 } else { 4 }];

            if broadcast {
                group.broadcast(&mut buf).await
            } else {
                group.all_reduce_mean(&mut buf).await
            }
        })
    });

    futures::future::join_all(ranks)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap_err().kind())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_all_reduce_mismatch_is_invalid_data_everywhere() {
    let kinds = run_mismatched("127.0.0.1:39519", false).await;
    assert_eq!(kinds, vec![std::io::ErrorKind::InvalidData; 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_broadcast_mismatch_is_invalid_data_everywhere() {
    let kinds = run_mismatched("127.0.0.1:39520", true).await;
    assert_eq!(kinds, vec![std::io::ErrorKind::InvalidData; 3]);
}
