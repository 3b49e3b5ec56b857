use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use gsm_agent_lib::{
    shutdown_channel, Agent, AgentConfig, AgentPaths, ControlPlane, GameServerInstance,
    GameServerOrder, HostCheckIn, LaunchSpec, ProcessControl, Result, RunOutcome,
    RunningProcess, ServerState, ServerStateReport, SteamCmd, SteamCmdExecutor, TargetType,
    WorkItem, WorkStatus, WorkStatusUpdate,
};

#[derive(Default)]
struct RecordingSteamCmd {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SteamCmdExecutor for RecordingSteamCmd {
    async fn execute(&self, args: &[String], _sentinel: Option<&str>) -> Result<RunOutcome> {
        self.calls.lock().unwrap().push(args.join(" "));
        Ok(RunOutcome {
            exit_code: Some(0),
            ..RunOutcome::default()
        })
    }
}

#[derive(Default)]
struct NoProcesses {
    next_pid: AtomicU32,
}

#[async_trait]
impl ProcessControl for NoProcesses {
    async fn find_running(
        &self,
        _process_name: &str,
        _install_dir: &Path,
    ) -> Result<Option<RunningProcess>> {
        Ok(None)
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<RunningProcess> {
        Ok(RunningProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            name: spec.label.clone(),
            exe: Some(spec.program.clone()),
        })
    }

    async fn terminate(&self, _process: &RunningProcess, _grace: Duration) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedControlServer {
    work: Mutex<VecDeque<WorkItem>>,
    statuses: Mutex<Vec<WorkStatusUpdate>>,
    states: Mutex<Vec<ServerStateReport>>,
}

impl ScriptedControlServer {
    fn statuses_for(&self, id: Uuid) -> Vec<WorkStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.work_id == id)
            .map(|u| u.status)
            .collect()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlServer {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn confirm_registration(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_work(&self) -> Result<Vec<WorkItem>> {
        Ok(self.work.lock().unwrap().drain(..).collect())
    }

    async fn send_work_status(&self, update: &WorkStatusUpdate) -> Result<()> {
        self.statuses.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn send_check_in(&self, _check_in: &HostCheckIn) -> Result<()> {
        Ok(())
    }

    async fn send_server_state(&self, report: &ServerStateReport) -> Result<()> {
        self.states.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn install_order_is_executed_and_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = AgentPaths::new(tmp.path());
    paths.ensure_data_dirs().unwrap();

    let mut instance = GameServerInstance::new(Uuid::new_v4(), "Test Server");
    instance.steam_tool_id = 12345;
    let order = GameServerOrder {
        instance,
        validate: false,
    };
    let server_id = order.instance.id;
    let item = WorkItem::new(TargetType::Install, serde_json::to_vec(&order).unwrap());
    let work_id = item.id;

    let control = Arc::new(ScriptedControlServer::default());
    control.work.lock().unwrap().push_back(item);
    let steam = Arc::new(RecordingSteamCmd::default());

    let config = AgentConfig {
        dispatch_interval_ms: 10,
        broker_interval_ms: 10,
        host_loop_interval_ms: 50,
        ..AgentConfig::default()
    };
    let agent = Arc::new(Agent::assemble(
        config,
        paths.clone(),
        Client::new(),
        SteamCmd::new(Arc::clone(&steam) as _, ""),
        Arc::new(NoProcesses::default()),
        Arc::clone(&control) as _,
    ));
    let registry = agent.registry();

    let (trigger, shutdown) = shutdown_channel();
    let running = tokio::spawn(Arc::clone(&agent).run(shutdown));

    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        while !control.statuses_for(work_id).contains(&WorkStatus::Completed) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    trigger.trigger();
    running.await.unwrap().unwrap();
    assert!(completed.is_ok(), "install never completed");

    let statuses = control.statuses_for(work_id);
    let position = |status: WorkStatus| statuses.iter().position(|s| *s == status).unwrap();
    assert!(position(WorkStatus::PickedUp) < position(WorkStatus::InProgress));
    assert!(position(WorkStatus::InProgress) < position(WorkStatus::Completed));
    assert!(!statuses.contains(&WorkStatus::Failed));

    let calls = steam.calls.lock().unwrap().clone();
    assert!(calls.iter().any(|c| c.contains("+app_update 12345")));
    assert!(calls.iter().all(|c| c.ends_with("+quit")));

    assert_eq!(
        registry.get(&server_id).unwrap().server_state,
        ServerState::Shutdown
    );
    assert!(control
        .states
        .lock()
        .unwrap()
        .iter()
        .any(|r| r.server_id == server_id && r.state == ServerState::Shutdown));

    let saved = std::fs::read_to_string(paths.game_server_state_path()).unwrap();
    assert!(saved.contains(&server_id.to_string()));
}

#[tokio::test]
async fn duplicate_work_is_only_queued_once() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = AgentPaths::new(tmp.path());
    paths.ensure_data_dirs().unwrap();

    let agent = Agent::assemble(
        AgentConfig::default(),
        paths,
        Client::new(),
        SteamCmd::new(Arc::new(RecordingSteamCmd::default()), ""),
        Arc::new(NoProcesses::default()),
        Arc::new(ScriptedControlServer::default()),
    );
    let queue = agent.work_queue();
    let item = WorkItem::new(TargetType::HostStatusRefresh, Vec::new());

    assert!(queue.enqueue(item.clone()));
    assert!(!queue.enqueue(item));
    assert_eq!(queue.len(), 1);
}
