#[allow(dead_code)]
mod common;

use artbot_core::net::messages::{
    AgentMessage, CommandResponseMsg, HubEvent, LogEntryMsg, LogLevel,
};
use artbot_core::robot::RobotStatus;
use artbot_core::role::Role;
use artbot_hub::auth::ROLE_HEADER;
use common::{
    TestServer, connect_agent, connect_dashboard, read_command, read_event_until, send_agent_msg,
};
use futures::SinkExt;
use serde_json::{Value, json};

async fn post_command(server: &TestServer, role: Role, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.api_url("/commands"))
        .header(ROLE_HEADER, role.to_string())
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_and_ready() {
    let server = TestServer::new().await;
    let _agent = connect_agent(&server, "robot-1").await;

    let resp = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["fleet"]["agents"], 1);
    assert_eq!(body["websocket_connections"], 1);

    let ready = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(ready, "ready");
}

#[tokio::test]
async fn list_and_get_robots() {
    let server = TestServer::new().await;
    let robots: Vec<Value> = reqwest::get(server.api_url("/robots"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(robots.is_empty());

    let _a = connect_agent(&server, "robot-2").await;
    let _b = connect_agent(&server, "robot-1").await;

    let robots: Vec<Value> = reqwest::get(server.api_url("/robots"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = robots.iter().filter_map(|r| r["id"].as_str()).collect();
    assert_eq!(ids, ["robot-1", "robot-2"]);

    let robot: Value = reqwest::get(server.api_url("/robots/robot-1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(robot["status"], "idle");
    assert_eq!(robot["hostname"], "robot-1.local");

    let missing = reqwest::get(server.api_url("/robots/ghost")).await.unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "unknown_robot");
}

#[tokio::test]
async fn command_error_statuses() {
    let server = TestServer::new().await;
    let mut agent = connect_agent(&server, "robot-1").await;

    let resp = post_command(
        &server,
        Role::Admin,
        json!({"robot_id": "ghost", "action": "start"}),
    )
    .await;
    assert_eq!(resp.status(), 404);

    let resp = post_command(
        &server,
        Role::Admin,
        json!({"robot_id": "robot-1", "action": "dance"}),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = post_command(
        &server,
        Role::Museum,
        json!({"robot_id": "robot-1", "action": "reboot"}),
    )
    .await;
    assert_eq!(resp.status(), 403);

    agent.close(None).await.unwrap();
    let hub = &server.state.hub;
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while hub.is_agent_connected("robot-1").await {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let resp = post_command(
        &server,
        Role::Admin,
        json!({"robot_id": "robot-1", "action": "start"}),
    )
    .await;
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "robot_offline");
    assert_eq!(
        hub.get("robot-1").await.unwrap().status,
        RobotStatus::Offline
    );
}

#[tokio::test]
async fn command_without_wait_is_accepted() {
    let server = TestServer::new().await;
    let mut agent = connect_agent(&server, "robot-1").await;

    let resp = post_command(
        &server,
        Role::Museum,
        json!({"robot_id": "robot-1", "action": "start", "parameters": {"speed": 0.5}}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let command_id = body["results"][0]["command_id"].as_str().unwrap().to_string();

    let cmd = read_command(&mut agent).await;
    assert_eq!(cmd.command_id.to_string(), command_id);
    assert_eq!(cmd.parameters["speed"], 0.5);

    let pending: Vec<Value> = reqwest::get(server.api_url("/commands/pending"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["robot_id"], "robot-1");
    assert_eq!(pending[0]["issued_by"], "museum");
}

#[tokio::test]
async fn command_with_wait_returns_agent_answer() {
    let server = TestServer::new().await;
    let mut agent = connect_agent(&server, "robot-1").await;

    let responder = tokio::spawn(async move {
        let cmd = read_command(&mut agent).await;
        send_agent_msg(
            &mut agent,
            &AgentMessage::CommandResponse(CommandResponseMsg {
                command_id: Some(cmd.command_id),
                status: Some("success".to_string()),
                message: Some("restarting".to_string()),
                ..CommandResponseMsg::default()
            }),
        )
        .await;
        agent
    });

    let resp = post_command(
        &server,
        Role::Admin,
        json!({"robot_id": "robot-1", "action": "restart", "wait": true}),
    )
    .await;
    let _agent = responder.await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["outcome"]["outcome"], "acked");
    assert_eq!(body["results"][0]["outcome"]["message"], "restarting");
}

#[tokio::test]
async fn unanswered_command_times_out_and_reverts() {
    let server = TestServer::with_short_timeout().await;
    let _agent = connect_agent(&server, "robot-1").await;
    let (mut dash, _) = connect_dashboard(&server, Role::Museum).await;

    let resp = post_command(
        &server,
        Role::Museum,
        json!({"robot_id": "robot-1", "action": "start", "wait": true}),
    )
    .await;
    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "command_timeout");

    let timeout = read_event_until(&mut dash, |e| matches!(e, HubEvent::CommandTimeout(_))).await;
    let HubEvent::CommandTimeout(timeout) = timeout else {
        unreachable!()
    };
    assert_eq!(timeout.robot_id, "robot-1");

    let robot = server.state.hub.get("robot-1").await.unwrap();
    assert_eq!(robot.status, RobotStatus::Idle);
    assert!(server.state.hub.pending_commands().await.is_empty());
}

#[tokio::test]
async fn exhibition_reports_each_robot() {
    let server = TestServer::new().await;
    let mut a = connect_agent(&server, "A").await;
    let _b = connect_agent(&server, "B").await;
    let mut c = connect_agent(&server, "C").await;
    c.close(None).await.unwrap();
    let hub = &server.state.hub;
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while hub.is_agent_connected("C").await {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let resp = post_command(
        &server,
        Role::Museum,
        json!({"robot_id": "all", "action": "start_all"}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0]["error"].is_null());
    assert!(results[1]["error"].is_null());
    assert_eq!(results[2]["robot_id"], "C");
    assert_eq!(results[2]["error"], "robot_offline");
    assert_eq!(read_command(&mut a).await.robot_id, "A");

    let status: Value = reqwest::get(server.api_url("/exhibition"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["total_robots"], 3);
    assert_eq!(status["online_robots"], 2);
    assert_eq!(status["active_robots"], 2);
    assert_eq!(status["exhibition_running"], true);
}

#[tokio::test]
async fn delete_robot_is_admin_only() {
    let server = TestServer::new().await;
    let _agent = connect_agent(&server, "robot-1").await;
    let (mut dash, _) = connect_dashboard(&server, Role::Museum).await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(server.api_url("/robots/robot-1"))
        .header(ROLE_HEADER, "museum")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .delete(server.api_url("/robots/robot-1"))
        .header(ROLE_HEADER, "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let removed = read_event_until(&mut dash, |e| matches!(e, HubEvent::RobotRemoved(_))).await;
    assert!(matches!(removed, HubEvent::RobotRemoved(r) if r.robot_id == "robot-1"));

    let resp = reqwest::get(server.api_url("/robots/robot-1")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

async fn get_as(server: &TestServer, role: Role, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(server.api_url(path))
        .header(ROLE_HEADER, role.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn agents_are_listed_for_admins_with_peer_address() {
    let server = TestServer::new().await;
    let _agent = connect_agent(&server, "robot-1").await;

    assert_eq!(get_as(&server, Role::Museum, "/agents").await.status(), 403);

    let body: Value = get_as(&server, Role::Admin, "/agents")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["agents"][0]["agent_id"], "robot-1");
    assert_eq!(body["agents"][0]["hostname"], "robot-1.local");
    assert_eq!(body["agents"][0]["ip_address"], "127.0.0.1");

    let one = get_as(&server, Role::Admin, "/agents/robot-1").await;
    assert_eq!(one.status(), 200);
    assert_eq!(
        get_as(&server, Role::Admin, "/agents/ghost").await.status(),
        404
    );

    let stats: Value = get_as(&server, Role::Admin, "/agents/stats/connections")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stats["agents"], 1);
    assert_eq!(stats["connected_agents"], json!(["robot-1"]));
}

#[tokio::test]
async fn agent_log_lines_are_queryable() {
    let server = TestServer::new().await;
    let mut agent = connect_agent(&server, "robot-1").await;

    for (level, message) in [(LogLevel::Info, "booted"), (LogLevel::Error, "lidar fault")] {
        send_agent_msg(
            &mut agent,
            &AgentMessage::LogEntry(LogEntryMsg {
                level,
                message: message.to_string(),
                ..LogEntryMsg::default()
            }),
        )
        .await;
    }

    let body = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let body: Value = reqwest::get(server.api_url("/robots/robot-1/logs"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if body["total"] == 2 {
                return body;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(body["robot_id"], "robot-1");
    assert_eq!(body["logs"][0]["message"], "lidar fault");
    assert_eq!(body["logs"][0]["level"], "ERROR");
    assert_eq!(body["logs"][0]["source"], "robot");

    let errors: Value = reqwest::get(server.api_url("/logs?level=ERROR&limit=10"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(errors["total"], 1);

    let bad = reqwest::get(server.api_url("/logs?level=loud")).await.unwrap();
    assert_eq!(bad.status(), 400);
    let missing = reqwest::get(server.api_url("/robots/ghost/logs"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn command_history_records_acknowledgement() {
    let server = TestServer::new().await;
    let mut agent = connect_agent(&server, "robot-1").await;

    let resp = post_command(
        &server,
        Role::Museum,
        json!({"robot_id": "robot-1", "action": "start"}),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let cmd = read_command(&mut agent).await;
    send_agent_msg(
        &mut agent,
        &AgentMessage::CommandResponse(CommandResponseMsg {
            command_id: Some(cmd.command_id),
            success: Some(true),
            ..CommandResponseMsg::default()
        }),
    )
    .await;

    let stats = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let stats: Value = reqwest::get(server.api_url("/commands/stats?robot_id=robot-1"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if stats["acked"] == 1 {
                return stats;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(stats["total_commands"], 1);
    assert_eq!(stats["success_rate"], 100.0);

    let history: Value = reqwest::get(server.api_url("/robots/robot-1/commands"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["total"], 1);
    assert_eq!(history["commands"][0]["state"], "acked");
    assert_eq!(history["commands"][0]["action"], "start");
    assert_eq!(
        history["commands"][0]["command_id"],
        cmd.command_id.to_string()
    );
}
