mod support;

// Runs in its own test binary, so these two are the only participants in the arena.
#[tokio::test]
async fn when_opponent_disconnects_then_remaining_participant_wins() {
    let (mut first, _first_id) = support::join("First").await;
    let (mut second, _second_id) = support::join("Second").await;

    loop {
        let state = support::next_of_type(&mut first, "MatchState").await;
        if state["data"]["state"] == "Running" {
            break;
        }
    }

    second.close(None).await.expect("close second");

    let result = support::next_of_type(&mut first, "AnnounceResult").await;
    assert_eq!(result["data"]["outcome"], "Win");
    assert_eq!(result["data"]["text"], "You Win");
}
