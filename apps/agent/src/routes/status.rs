use std::sync::Arc;

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use uplink::{ControllerClient, Protocol};

use crate::monitoring::MonitoringScheduler;

/// Everything the status route reads from
pub struct StatusSource {
    pub agent_id: String,
    pub client: Arc<ControllerClient>,
    pub scheduler: Arc<MonitoringScheduler>,
}

#[derive(Debug, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub protocol: Protocol,
    pub push_connected: bool,
    pub active_targets: usize,
    pub poll_interval_secs: u64,
}

impl StatusSource {
    pub async fn snapshot(&self) -> AgentStatus {
        AgentStatus {
            agent_id: self.agent_id.clone(),
            protocol: self.client.current_protocol().await,
            push_connected: self.client.is_push_connected().await,
            active_targets: self.scheduler.active_count().await,
            poll_interval_secs: self.scheduler.poll_interval().await.as_secs(),
        }
    }
}

/// Connection and scheduling state of this agent
#[get("/status")]
pub async fn status_route(source: web::Data<StatusSource>) -> impl Responder {
    HttpResponse::Ok().json(source.snapshot().await)
}
