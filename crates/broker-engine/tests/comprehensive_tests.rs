//! # comprehensive engine tests
//!
//! why: verify command processing, workflow execution and partitions end to end
//! relations: drives broker-engine through StreamProcessor over an in-test log and through Partition over raft
//! what: scenarios, job / incident / deployment rules, workflows, cancel, replay, partitions, snapshots

use broker_engine::*;
use raft_core::{codec, Endpoint, Envelope, RaftConfig};
use raft_storage::FileStorage;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

const PARTITION: u32 = 1;

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

fn job(job_type: &str, retries: u32) -> RecordValue {
    RecordValue::Job(JobRecord {
        job_type: job_type.to_string(),
        retries,
        ..JobRecord::default()
    })
}

fn job_with_payload(value: serde_json::Value) -> RecordValue {
    RecordValue::Job(JobRecord {
        payload: payload(value),
        ..JobRecord::default()
    })
}

fn failure(retries: u32, message: &str) -> RecordValue {
    RecordValue::Job(JobRecord {
        retries,
        error_message: message.to_string(),
        ..JobRecord::default()
    })
}

fn batch(job_type: &str, amount: i32, timeout: i64) -> RecordValue {
    RecordValue::JobBatch(JobBatchRecord {
        job_type: job_type.to_string(),
        worker: "worker-1".to_string(),
        timeout,
        amount,
        ..JobBatchRecord::default()
    })
}

fn deployment(workflows: Vec<Workflow>) -> RecordValue {
    RecordValue::Deployment(DeploymentRecord {
        workflows,
        ..DeploymentRecord::default()
    })
}

fn instance_of(process_id: &str, variables: serde_json::Value) -> RecordValue {
    RecordValue::WorkflowInstance(WorkflowInstanceRecord {
        process_id: process_id.to_string(),
        payload: payload(variables),
        ..WorkflowInstanceRecord::default()
    })
}

fn message(name: &str, correlation_key: &str, id: &str, ttl: u64, variables: serde_json::Value) -> RecordValue {
    RecordValue::Message(MessageRecord {
        name: name.to_string(),
        correlation_key: correlation_key.to_string(),
        message_id: id.to_string(),
        time_to_live: ttl,
        payload: payload(variables),
    })
}

fn service_task_workflow() -> Workflow {
    Workflow::builder("order")
        .start_event("start")
        .service_task("task", "payment", 3)
        .end_event("end")
        .build()
}

fn timer_workflow() -> Workflow {
    Workflow::builder("delay")
        .start_event("start")
        .timer_catch_event("timer", 1_000)
        .end_event("end")
        .build()
}

fn message_workflow() -> Workflow {
    Workflow::builder("shipping")
        .start_event("start")
        .message_catch_event("paid", "order-paid", "orderId")
        .end_event("end")
        .build()
}

/// a single leader: every produced record is appended to the log and processed in turn
struct Engine {
    processor: StreamProcessor,
    log: Vec<Record>,
    processed: usize,
    now: u64,
    config: EngineConfig,
    triggers: TimeTriggers,
}

impl Engine {
    fn new() -> Self {
        Self {
            processor: StreamProcessor::new(PARTITION),
            log: Vec::new(),
            processed: 0,
            now: 0,
            config: EngineConfig::default(),
            triggers: TimeTriggers::new(),
        }
    }

    fn append(&mut self, mut record: Record) -> u64 {
        record.position = self.log.len() as u64 + 1;
        record.partition_id = PARTITION;
        let position = record.position;
        self.log.push(record);
        position
    }

    /// append a command stamped with the current time and process everything
    fn command(&mut self, key: u64, intent: Intent, value: RecordValue) -> u64 {
        let mut record = Record::command(key, intent, value);
        record.timestamp = self.now;
        let position = self.append(record);
        self.run();
        position
    }

    fn run(&mut self) {
        while self.processed < self.log.len() {
            let record = self.log[self.processed].clone();
            self.processed += 1;
            for follow_up in self.processor.process(&record) {
                self.append(follow_up);
            }
        }
    }

    fn advance(&mut self, now: u64) {
        self.now = now;
        let commands = self
            .triggers
            .due_commands(&self.config, self.processor.state(), now);
        for mut command in commands {
            command.timestamp = now;
            self.append(command);
        }
        self.run();
    }

    fn state(&self) -> &PartitionState {
        self.processor.state()
    }

    /// the event or rejection a command produced
    fn response(&self, position: u64) -> &Record {
        self.log
            .iter()
            .find(|r| r.source_position == position && r.kind() != RecordKind::Command)
            .expect("command has a response")
    }

    fn events(&self, record_type: RecordType, intent: Intent) -> Vec<&Record> {
        self.log
            .iter()
            .filter(|r| r.kind() == RecordKind::Event)
            .filter(|r| r.record_type() == record_type && r.intent() == intent)
            .collect()
    }

    fn last_event(&self, record_type: RecordType, intent: Intent) -> &Record {
        self.events(record_type, intent)
            .pop()
            .expect("event was written")
    }

    fn rejections(&self) -> Vec<&Record> {
        self.log.iter().filter(|r| r.is_rejection()).collect()
    }

    /// (element id, intent) of every workflow instance event
    fn trace(&self) -> Vec<(String, Intent)> {
        self.log
            .iter()
            .filter(|r| r.kind() == RecordKind::Event)
            .filter_map(|r| {
                r.value
                    .as_workflow_instance()
                    .map(|v| (v.element_id.clone(), r.intent()))
            })
            .collect()
    }

    fn element_key(&self, element_id: &str) -> u64 {
        self.log
            .iter()
            .find(|r| {
                r.intent() == Intent::ElementActivated
                    && r.value
                        .as_workflow_instance()
                        .map_or(false, |v| v.element_id == element_id)
            })
            .map(|r| r.key)
            .expect("element was activated")
    }

    fn deploy(&mut self, workflow: Workflow) -> u64 {
        let position = self.command(0, Intent::Create, deployment(vec![workflow]));
        let response = self.response(position);
        assert_eq!(response.intent(), Intent::Created, "{:?}", response.metadata);
        response.value.as_deployment().unwrap().deployed[0].key
    }

    fn create_instance(&mut self, process_id: &str, variables: serde_json::Value) -> u64 {
        let position = self.command(0, Intent::Create, instance_of(process_id, variables));
        let response = self.response(position);
        assert_eq!(response.intent(), Intent::ElementReady, "{:?}", response.metadata);
        response.key
    }

    fn create_job(&mut self, job_type: &str, retries: u32) -> u64 {
        let position = self.command(0, Intent::Create, job(job_type, retries));
        self.response(position).key
    }

    fn activate(&mut self, job_type: &str, amount: i32) -> Vec<u64> {
        let position = self.command(0, Intent::Activate, batch(job_type, amount, 10_000));
        self.response(position)
            .value
            .as_job_batch()
            .unwrap()
            .job_keys
            .clone()
    }
}

fn assert_rejected(record: &Record, rejection_type: RejectionType, reason: &str) {
    assert!(record.is_rejection(), "expected a rejection, got {:?}", record.intent());
    assert_eq!(record.metadata.rejection_type, Some(rejection_type));
    assert_eq!(record.metadata.rejection_reason, reason);
}

// =============================================================================
// SECTION 1: JOB COMPLETE SCENARIOS
// =============================================================================

mod complete_scenarios {
    use super::*;

    #[test]
    fn completing_an_activated_job_deletes_it_and_carries_the_payload() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);
        assert_eq!(key, 1);
        assert_eq!(engine.activate("payment", 1), vec![1]);

        let position = engine.command(1, Intent::Complete, job_with_payload(json!({"paid": true})));

        let completed = engine.response(position);
        assert_eq!(completed.intent(), Intent::Completed);
        assert_eq!(completed.key, 1);
        assert_eq!(completed.value.as_job().unwrap().payload, payload(json!({"paid": true})));
        assert!(!engine.state().jobs.exists(1));
    }

    #[test]
    fn completing_a_missing_job_is_not_found() {
        let mut engine = Engine::new();
        let position = engine.command(2, Intent::Complete, job_with_payload(json!({})));

        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to complete job 2, but no such job exists",
        );
    }

    #[test]
    fn command_with_the_largest_key_is_rejected() {
        let mut engine = Engine::new();
        let position = engine.command(u64::MAX, Intent::Complete, job_with_payload(json!({})));

        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            &format!("Expected command key to be lower than {0}, but it was {0}", u64::MAX),
        );
        assert_eq!(engine.create_job("payment", 3), 1);
    }

    #[test]
    fn completing_a_failed_job_names_its_incident() {
        let mut engine = Engine::new();
        let failed = JobRecord {
            job_type: "payment".to_string(),
            retries: 0,
            ..JobRecord::default()
        };
        let state = engine.processor.state_mut();
        state.jobs.create(3, failed.clone());
        state.jobs.fail(3, failed);
        state.incidents.create(
            7,
            IncidentRecord {
                error_type: ErrorType::JobNoRetries,
                job_key: 3,
                ..IncidentRecord::default()
            },
        );

        let position = engine.command(3, Intent::Complete, job_with_payload(json!({})));

        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            "Expected to complete job 3, but the job is failed; incident 7 must be resolved first",
        );
        assert!(engine.state().jobs.exists(3));
    }

    #[test]
    fn failed_job_without_incident_is_an_internal_error() {
        let mut engine = Engine::new();
        let failed = JobRecord {
            retries: 0,
            ..JobRecord::default()
        };
        let state = engine.processor.state_mut();
        state.jobs.create(4, failed.clone());
        state.jobs.fail(4, failed);

        let position = engine.command(4, Intent::Complete, job_with_payload(json!({})));

        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            "Expected to complete job 4, but the job is failed; no incident was created, an internal error was raised",
        );
    }
}

// =============================================================================
// SECTION 2: JOB LIFECYCLE
// =============================================================================

mod job_lifecycle {
    use super::*;

    #[test]
    fn failing_without_retries_raises_an_incident() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 1);
        engine.activate("payment", 1);

        let position = engine.command(key, Intent::Fail, failure(0, "card declined"));
        assert_eq!(engine.response(position).intent(), Intent::Failed);

        let incident = engine.last_event(RecordType::Incident, Intent::Created).clone();
        let value = incident.value.as_incident().unwrap();
        assert_eq!(value.error_type, ErrorType::JobNoRetries);
        assert_eq!(value.error_message, "card declined");
        assert_eq!(value.job_key, key);
        assert_eq!(engine.state().incidents.job_incident_key(key), Some(incident.key));

        // the failed job can't be completed until the incident is resolved
        let position = engine.command(key, Intent::Complete, job_with_payload(json!({})));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            &format!(
                "Expected to complete job {}, but the job is failed; incident {} must be resolved first",
                key, incident.key
            ),
        );
    }

    #[test]
    fn failing_with_retries_makes_the_job_activatable_again() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);
        engine.activate("payment", 1);

        engine.command(key, Intent::Fail, failure(2, "try again"));

        assert!(engine.events(RecordType::Incident, Intent::Created).is_empty());
        assert_eq!(engine.activate("payment", 1), vec![key]);
    }

    #[test]
    fn failing_a_job_that_is_not_activated_is_invalid() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);

        let position = engine.command(key, Intent::Fail, failure(2, ""));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            &format!("Expected to fail job {}, but it is not activated", key),
        );

        let position = engine.command(99, Intent::Fail, failure(2, ""));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to fail job 99, but no such job exists",
        );
    }

    #[test]
    fn updating_retries_resolves_the_job_incident() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 1);
        engine.activate("payment", 1);
        engine.command(key, Intent::Fail, failure(0, ""));
        let incident_key = engine.last_event(RecordType::Incident, Intent::Created).key;

        let position = engine.command(key, Intent::UpdateRetries, failure(2, ""));

        assert_eq!(engine.response(position).intent(), Intent::RetriesUpdated);
        let resolved = engine.last_event(RecordType::Incident, Intent::Resolved);
        assert_eq!(resolved.key, incident_key);
        assert!(engine.state().incidents.is_empty());
        assert_eq!(engine.activate("payment", 1), vec![key]);
    }

    #[test]
    fn update_retries_rejections() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 1);

        let position = engine.command(key, Intent::UpdateRetries, failure(0, ""));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            &format!(
                "Expected to update retries for job {} with a positive amount of retries, but the amount given was 0",
                key
            ),
        );

        let position = engine.command(key, Intent::UpdateRetries, failure(3, ""));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            &format!("Expected to update retries for job {}, but the job is not failed", key),
        );

        let position = engine.command(42, Intent::UpdateRetries, failure(3, ""));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to update retries for job 42, but no such job exists",
        );
    }

    #[test]
    fn expired_jobs_time_out_and_become_activatable() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);
        let position = engine.command(0, Intent::Activate, batch("payment", 1, 500));
        let activated = engine.response(position).value.as_job_batch().unwrap().jobs[0].clone();
        assert_eq!(activated.deadline, 500);
        assert_eq!(activated.worker, "worker-1");

        engine.advance(400);
        assert!(engine.events(RecordType::Job, Intent::TimedOut).is_empty());

        engine.advance(1_500);
        let timed_out = engine.last_event(RecordType::Job, Intent::TimedOut);
        assert_eq!(timed_out.key, key);
        assert_eq!(engine.activate("payment", 1), vec![key]);
    }

    #[test]
    fn timing_out_a_job_that_is_not_activated_is_rejected() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);

        let position = engine.command(key, Intent::TimeOut, job("payment", 3));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            &format!("Expected to time out job {}, but it was not activated yet", key),
        );

        let position = engine.command(77, Intent::TimeOut, job("payment", 3));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to time out job 77, but no such job exists",
        );
    }

    #[test]
    fn batch_activation_takes_jobs_of_the_type_in_key_order() {
        let mut engine = Engine::new();
        let first = engine.create_job("payment", 3);
        let other = engine.create_job("shipping", 3);
        let second = engine.create_job("payment", 3);
        let third = engine.create_job("payment", 3);

        let position = engine.command(0, Intent::Activate, batch("payment", 2, 1_000));
        let response = engine.response(position);
        assert_eq!(response.intent(), Intent::Activated);
        assert_eq!(response.value.as_job_batch().unwrap().job_keys, vec![first, second]);

        // every activated job gets its own event after the batch
        let activated: Vec<u64> = engine
            .events(RecordType::Job, Intent::Activated)
            .iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(activated, vec![first, second]);

        assert_eq!(engine.activate("payment", 5), vec![third]);
        assert_eq!(engine.activate("shipping", 5), vec![other]);
        assert!(engine.activate("payment", 5).is_empty());
    }

    #[test]
    fn batch_activation_validates_its_arguments() {
        let mut engine = Engine::new();

        let position = engine.command(0, Intent::Activate, batch(" ", 1, 1_000));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            "Expected to activate job batch with type to be present, but it was blank",
        );

        let position = engine.command(0, Intent::Activate, batch("payment", 0, 1_000));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            "Expected to activate job batch with amount to be greater than zero, but it was 0",
        );

        let position = engine.command(0, Intent::Activate, batch("payment", 1, -5));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            "Expected to activate job batch with timeout to be greater than zero, but it was -5",
        );
    }

    #[test]
    fn canceling_deletes_the_job() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);

        let position = engine.command(key, Intent::Cancel, job("payment", 3));
        assert_eq!(engine.response(position).intent(), Intent::Canceled);
        assert!(engine.state().jobs.is_empty());

        let position = engine.command(key, Intent::Cancel, job("payment", 3));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            &format!("Expected to cancel job {}, but no such job exists", key),
        );
    }
}

// =============================================================================
// SECTION 3: INCIDENTS
// =============================================================================

mod incidents {
    use super::*;

    fn incident_for_job(job_key: u64) -> RecordValue {
        RecordValue::Incident(IncidentRecord {
            error_type: ErrorType::JobNoRetries,
            job_key,
            ..IncidentRecord::default()
        })
    }

    #[test]
    fn job_incident_requires_a_failed_job() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 3);

        let position = engine.command(0, Intent::Create, incident_for_job(key));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            &format!("Expected job {} to be in failed state, but it was ACTIVATABLE", key),
        );

        let position = engine.command(0, Intent::Create, incident_for_job(50));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected job 50 to be in failed state, but it was not found",
        );
    }

    #[test]
    fn element_incident_requires_a_failed_token() {
        let mut engine = Engine::new();
        let incident = RecordValue::Incident(IncidentRecord {
            error_type: ErrorType::ExtractValueError,
            element_instance_key: 5,
            ..IncidentRecord::default()
        });

        let position = engine.command(0, Intent::Create, incident);
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to have a failed event 5, but none was found",
        );
    }

    #[test]
    fn resolving_an_unknown_incident_is_not_found() {
        let mut engine = Engine::new();
        let position = engine.command(9, Intent::Resolve, incident_for_job(0));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to resolve incident with key '9', but no such incident was found",
        );
    }

    #[test]
    fn resolving_removes_the_incident() {
        let mut engine = Engine::new();
        let key = engine.create_job("payment", 1);
        engine.activate("payment", 1);
        engine.command(key, Intent::Fail, failure(0, ""));
        let incident_key = engine.last_event(RecordType::Incident, Intent::Created).key;

        let position = engine.command(incident_key, Intent::Resolve, incident_for_job(key));
        assert_eq!(engine.response(position).intent(), Intent::Resolved);
        assert!(engine.state().incidents.is_empty());
        assert_eq!(engine.state().incidents.job_incident_key(key), None);
    }
}

// =============================================================================
// SECTION 4: DEPLOYMENT
// =============================================================================

mod deployments {
    use super::*;

    #[test]
    fn deploying_assigns_keys_and_versions() {
        let mut engine = Engine::new();
        let position = engine.command(0, Intent::Create, deployment(vec![service_task_workflow()]));
        let created = engine.response(position);
        assert_eq!(created.intent(), Intent::Created);
        let deployed = created.value.as_deployment().unwrap().deployed.clone();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].process_id, "order");
        assert_eq!(deployed[0].version, 1);

        let position = engine.command(0, Intent::Create, deployment(vec![service_task_workflow()]));
        let redeployed = &engine.response(position).value.as_deployment().unwrap().deployed;
        assert_eq!(redeployed[0].version, 2);
        assert_ne!(redeployed[0].key, deployed[0].key);

        let latest = engine.state().workflows.workflow_by_process_id("order", 0).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(
            engine.state().workflows.workflow_by_process_id("order", 1).unwrap().key,
            deployed[0].key
        );
    }

    #[test]
    fn redeploying_an_existing_deployment_key_already_exists() {
        let mut engine = Engine::new();
        let position = engine.command(0, Intent::Create, deployment(vec![service_task_workflow()]));
        let key = engine.response(position).key;

        let position = engine.command(key, Intent::Create, deployment(vec![service_task_workflow()]));
        assert_rejected(
            engine.response(position),
            RejectionType::AlreadyExists,
            &format!("Expected to create a new deployment {}, but it already exists", key),
        );
    }

    #[test]
    fn empty_and_invalid_deployments_are_rejected() {
        let mut engine = Engine::new();

        let position = engine.command(0, Intent::Create, deployment(Vec::new()));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            "Expected to deploy at least one workflow, but none given",
        );

        let broken = Workflow::builder("broken").end_event("end").build();
        let position = engine.command(0, Intent::Create, deployment(vec![broken]));
        let rejection = engine.response(position);
        assert_eq!(rejection.metadata.rejection_type, Some(RejectionType::InvalidArgument));
        assert!(rejection
            .metadata
            .rejection_reason
            .starts_with("Expected to deploy workflow 'broken', but it is invalid: "));
        assert!(engine.state().workflows.workflow_by_process_id("broken", 0).is_none());
    }
}

// =============================================================================
// SECTION 5: WORKFLOW EXECUTION
// =============================================================================

mod workflows {
    use super::*;

    fn done(engine: &Engine) -> bool {
        engine.state().elements.is_empty()
    }

    #[test]
    fn service_task_instance_runs_to_completion() {
        let mut engine = Engine::new();
        engine.deploy(service_task_workflow());
        let instance = engine.create_instance("order", json!({"orderId": 1}));

        let created = engine.last_event(RecordType::Job, Intent::Created);
        let job = created.value.as_job().unwrap();
        assert_eq!(job.job_type, "payment");
        assert_eq!(job.retries, 3);
        assert_eq!(job.headers.element_id, "task");
        assert_eq!(job.headers.workflow_instance_key, instance);
        assert_eq!(job.payload, payload(json!({"orderId": 1})));

        let job_key = engine.activate("payment", 1)[0];
        engine.command(job_key, Intent::Complete, job_with_payload(json!({"paid": true})));

        let trace = engine.trace();
        let expected = vec![
            ("order", Intent::ElementReady),
            ("order", Intent::ElementActivated),
            ("start", Intent::EventTriggered),
            ("start-task", Intent::SequenceFlowTaken),
            ("task", Intent::ElementReady),
            ("task", Intent::ElementActivated),
            ("task", Intent::ElementCompleting),
            ("task", Intent::ElementCompleted),
            ("task-end", Intent::SequenceFlowTaken),
            ("end", Intent::EventTriggered),
            ("order", Intent::ElementCompleting),
            ("order", Intent::ElementCompleted),
        ];
        let expected: Vec<(String, Intent)> = expected
            .into_iter()
            .map(|(id, intent)| (id.to_string(), intent))
            .collect();
        assert_eq!(trace, expected);

        let completed = engine.last_event(RecordType::WorkflowInstance, Intent::ElementCompleted);
        assert_eq!(completed.key, instance);
        assert_eq!(
            completed.value.as_workflow_instance().unwrap().payload,
            payload(json!({"orderId": 1, "paid": true}))
        );
        assert!(done(&engine));
        assert!(engine.state().jobs.is_empty());
    }

    #[test]
    fn instance_of_unknown_workflow_is_not_found() {
        let mut engine = Engine::new();

        let position = engine.command(0, Intent::Create, instance_of("missing", json!({})));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to create instance of workflow with process id 'missing', but no such workflow was found",
        );

        let by_key = RecordValue::WorkflowInstance(WorkflowInstanceRecord {
            workflow_key: 12,
            ..WorkflowInstanceRecord::default()
        });
        let position = engine.command(0, Intent::Create, by_key);
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to create instance of workflow with key '12', but no such workflow was found",
        );

        let position = engine.command(0, Intent::Create, instance_of("", json!({})));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            "Expected at least a workflow key or a process id, but none given",
        );
    }

    #[test]
    fn timer_catch_event_completes_when_due() {
        let mut engine = Engine::new();
        engine.deploy(timer_workflow());
        engine.create_instance("delay", json!({}));

        let timer = engine.last_event(RecordType::Timer, Intent::Created);
        assert_eq!(timer.value.as_timer().unwrap().due_date, 1_000);
        assert_eq!(engine.state().timers.len(), 1);

        engine.advance(500);
        assert!(engine.events(RecordType::Timer, Intent::Triggered).is_empty());

        engine.advance(1_000);
        assert_eq!(engine.events(RecordType::Timer, Intent::Triggered).len(), 1);
        assert!(engine.state().timers.is_empty());
        assert!(done(&engine));
    }

    #[test]
    fn timer_due_past_the_clock_waits_instead_of_overflowing() {
        let mut engine = Engine::new();
        engine.deploy(
            Workflow::builder("forever")
                .start_event("start")
                .timer_catch_event("timer", u64::MAX)
                .end_event("end")
                .build(),
        );
        engine.advance(1_000);
        engine.create_instance("forever", json!({}));

        let timer = engine.last_event(RecordType::Timer, Intent::Created);
        assert_eq!(timer.value.as_timer().unwrap().due_date, u64::MAX);

        engine.advance(10_000_000);
        assert!(engine.events(RecordType::Timer, Intent::Triggered).is_empty());
        assert!(!done(&engine));
    }

    #[test]
    fn timer_commands_for_missing_timers_are_rejected() {
        let mut engine = Engine::new();
        let timer = RecordValue::Timer(TimerRecord {
            element_instance_key: 3,
            ..TimerRecord::default()
        });

        let position = engine.command(9, Intent::Trigger, timer.clone());
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to trigger timer with key '9', but no such timer was found",
        );

        let position = engine.command(9, Intent::Cancel, timer);
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to cancel timer with key 9, but it does not exist",
        );
    }

    #[test]
    fn message_published_after_subscription_completes_the_catch_event() {
        let mut engine = Engine::new();
        engine.deploy(message_workflow());
        engine.create_instance("shipping", json!({"orderId": "o-1"}));

        let element = engine.element_key("paid");
        assert!(engine
            .state()
            .subscriptions
            .get(element, "order-paid")
            .unwrap()
            .is_opened());

        let position = engine.command(0, Intent::Publish, message("order-paid", "o-1", "", 0, json!({"amount": 10})));
        assert_eq!(engine.response(position).intent(), Intent::Published);

        assert_eq!(
            engine
                .events(RecordType::WorkflowInstanceSubscription, Intent::Correlated)
                .len(),
            1
        );
        let completed = engine.last_event(RecordType::WorkflowInstance, Intent::ElementCompleted);
        assert_eq!(
            completed.value.as_workflow_instance().unwrap().payload,
            payload(json!({"orderId": "o-1", "amount": 10}))
        );
        assert!(done(&engine));
        assert!(engine.state().subscriptions.is_empty());
    }

    #[test]
    fn buffered_message_correlates_when_the_subscription_opens() {
        let mut engine = Engine::new();
        engine.deploy(message_workflow());
        engine.command(0, Intent::Publish, message("order-paid", "o-2", "m-1", 10_000, json!({"amount": 5})));
        assert_eq!(engine.state().messages.len(), 1);

        engine.create_instance("shipping", json!({"orderId": "o-2"}));

        assert_eq!(
            engine
                .events(RecordType::WorkflowInstanceSubscription, Intent::Correlated)
                .len(),
            1
        );
        assert!(done(&engine));
    }

    #[test]
    fn numeric_correlation_variables_are_accepted() {
        let mut engine = Engine::new();
        engine.deploy(message_workflow());
        engine.create_instance("shipping", json!({"orderId": 42}));
        let element = engine.element_key("paid");

        let subscription = engine.state().subscriptions.get(element, "order-paid").unwrap();
        assert_eq!(subscription.record.correlation_key, "42");
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let mut engine = Engine::new();
        engine.command(0, Intent::Publish, message("order-paid", "o-1", "m-1", 10_000, json!({})));

        let position = engine.command(0, Intent::Publish, message("order-paid", "o-1", "m-1", 10_000, json!({})));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            "message with id 'm-1' is already published",
        );

        // same id under another correlation key is a different message
        let position = engine.command(0, Intent::Publish, message("order-paid", "o-2", "m-1", 10_000, json!({})));
        assert_eq!(engine.response(position).intent(), Intent::Published);
    }

    #[test]
    fn time_to_live_beyond_the_clock_is_rejected() {
        let mut engine = Engine::new();
        engine.advance(1_000);

        let position = engine.command(0, Intent::Publish, message("order-paid", "o-1", "", u64::MAX, json!({})));
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidArgument,
            &format!(
                "Expected message time to live to end before {0}, but it was {0}",
                u64::MAX
            ),
        );
        assert!(engine.state().messages.is_empty());

        let position = engine.command(0, Intent::Publish, message("order-paid", "o-1", "", u64::MAX - 1_000, json!({})));
        assert_eq!(engine.response(position).intent(), Intent::Published);
        assert_eq!(engine.state().messages.len(), 1);
    }

    #[test]
    fn expired_messages_are_deleted() {
        let mut engine = Engine::new();
        engine.command(0, Intent::Publish, message("order-paid", "o-1", "", 100, json!({})));
        assert_eq!(engine.state().messages.len(), 1);

        engine.advance(1_000);
        assert_eq!(engine.events(RecordType::Message, Intent::Deleted).len(), 1);
        assert!(engine.state().messages.is_empty());

        let position = engine.command(1, Intent::Delete, message("order-paid", "o-1", "", 0, json!({})));
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to delete message with key 1, but no such message was found",
        );
    }

    #[test]
    fn missing_correlation_variable_raises_an_incident_that_can_be_retried() {
        let mut engine = Engine::new();
        engine.deploy(message_workflow());
        engine.create_instance("shipping", json!({}));
        let element = engine.element_key("paid");

        let incident = engine.last_event(RecordType::Incident, Intent::Created).clone();
        let value = incident.value.as_incident().unwrap().clone();
        assert_eq!(value.error_type, ErrorType::ExtractValueError);
        assert_eq!(
            value.error_message,
            "Failed to extract the correlation-key by 'orderId': no value found"
        );
        assert_eq!(value.element_instance_key, element);
        assert!(engine.state().elements.failed_token(element).is_some());
        assert!(engine.state().subscriptions.is_empty());

        let update = RecordValue::WorkflowInstance(WorkflowInstanceRecord {
            payload: payload(json!({"orderId": "o-9"})),
            ..WorkflowInstanceRecord::default()
        });
        let position = engine.command(element, Intent::UpdatePayload, update);
        assert_eq!(engine.response(position).intent(), Intent::PayloadUpdated);

        let incident_key = incident.key;
        let resolve = RecordValue::Incident(value);
        engine.command(incident_key, Intent::Resolve, resolve);

        assert!(engine.state().incidents.is_empty());
        assert!(engine.state().elements.failed_token(element).is_none());
        let subscription = engine.state().subscriptions.get(element, "order-paid").unwrap();
        assert!(subscription.is_opened());
        assert_eq!(subscription.record.correlation_key, "o-9");
    }

    #[test]
    fn updating_the_payload_of_a_missing_element_is_not_found() {
        let mut engine = Engine::new();
        let position = engine.command(
            8,
            Intent::UpdatePayload,
            RecordValue::WorkflowInstance(WorkflowInstanceRecord::default()),
        );
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            "Expected to update payload for element with key 8, but no such element was found",
        );
    }

    #[test]
    fn subscription_commands_without_a_subscription_are_rejected() {
        let mut engine = Engine::new();
        let subscription = RecordValue::WorkflowInstanceSubscription(SubscriptionRecord {
            element_instance_key: 5,
            message_name: "x".to_string(),
            ..SubscriptionRecord::default()
        });

        engine.command(5, Intent::Open, subscription.clone());
        engine.command(5, Intent::Correlate, subscription.clone());
        engine.command(5, Intent::Close, subscription);

        let reasons: Vec<&str> = engine
            .rejections()
            .iter()
            .map(|r| r.metadata.rejection_reason.as_str())
            .collect();
        assert_eq!(
            reasons,
            vec![
                "Expected to open pre-existing workflow instance subscription with element 5 and message x, but none was found",
                "Expected to correlate workflow instance subscription with element 5 and message x, but none was found",
                "Expected to close workflow instance subscription with element 5 and message x, but none was found",
            ]
        );
    }

    #[test]
    fn opening_an_opened_subscription_is_invalid() {
        let mut engine = Engine::new();
        engine.deploy(message_workflow());
        engine.create_instance("shipping", json!({"orderId": "o-1"}));
        let element = engine.element_key("paid");
        let subscription = engine.state().subscriptions.get(element, "order-paid").unwrap().record.clone();

        let position = engine.command(
            element,
            Intent::Open,
            RecordValue::WorkflowInstanceSubscription(subscription),
        );
        assert_rejected(
            engine.response(position),
            RejectionType::InvalidState,
            &format!(
                "Expected to complete opening workflow instance subscription with element {} and message order-paid, but it is already opened",
                element
            ),
        );
    }
}

// =============================================================================
// SECTION 6: CANCEL
// =============================================================================

mod cancel {
    use super::*;

    fn cancel(engine: &mut Engine, instance: u64) -> u64 {
        engine.command(
            instance,
            Intent::Cancel,
            RecordValue::WorkflowInstance(WorkflowInstanceRecord::default()),
        )
    }

    #[test]
    fn canceling_terminates_the_instance_and_cancels_its_job() {
        let mut engine = Engine::new();
        engine.deploy(service_task_workflow());
        let instance = engine.create_instance("order", json!({}));
        let job_key = engine.last_event(RecordType::Job, Intent::Created).key;

        let position = cancel(&mut engine, instance);
        assert_eq!(engine.response(position).intent(), Intent::ElementTerminating);

        let terminated: Vec<String> = engine
            .events(RecordType::WorkflowInstance, Intent::ElementTerminated)
            .iter()
            .map(|r| r.value.as_workflow_instance().unwrap().element_id.clone())
            .collect();
        assert_eq!(terminated, vec!["task".to_string(), "order".to_string()]);
        assert_eq!(engine.last_event(RecordType::Job, Intent::Canceled).key, job_key);
        assert!(engine.state().elements.is_empty());
        assert!(engine.state().jobs.is_empty());

        let position = cancel(&mut engine, instance);
        assert_rejected(
            engine.response(position),
            RejectionType::NotFound,
            &format!(
                "Expected to cancel workflow instance with key {}, but no such workflow instance was found",
                instance
            ),
        );
    }

    #[test]
    fn canceling_releases_timers_and_subscriptions() {
        let mut engine = Engine::new();
        engine.deploy(timer_workflow());
        engine.deploy(message_workflow());
        let delayed = engine.create_instance("delay", json!({}));
        let waiting = engine.create_instance("shipping", json!({"orderId": "o-1"}));

        cancel(&mut engine, delayed);
        cancel(&mut engine, waiting);

        assert_eq!(engine.events(RecordType::Timer, Intent::Canceled).len(), 1);
        assert_eq!(
            engine
                .events(RecordType::WorkflowInstanceSubscription, Intent::Closed)
                .len(),
            1
        );
        assert!(engine.state().timers.is_empty());
        assert!(engine.state().subscriptions.is_empty());
        assert!(engine.state().elements.is_empty());

        // a message arriving later has nothing to correlate to
        engine.command(0, Intent::Publish, message("order-paid", "o-1", "", 0, json!({})));
        assert!(engine
            .events(RecordType::WorkflowInstanceSubscription, Intent::Correlated)
            .is_empty());
    }

    #[test]
    fn canceling_resolves_an_open_element_incident() {
        let mut engine = Engine::new();
        engine.deploy(message_workflow());
        let instance = engine.create_instance("shipping", json!({}));
        assert_eq!(engine.state().incidents.len(), 1);

        cancel(&mut engine, instance);

        assert_eq!(engine.events(RecordType::Incident, Intent::Resolved).len(), 1);
        assert!(engine.state().incidents.is_empty());
        assert!(engine.state().elements.is_empty());
    }

    #[test]
    fn only_root_instances_can_be_canceled() {
        let mut engine = Engine::new();
        engine.deploy(service_task_workflow());
        engine.create_instance("order", json!({}));
        let task = engine.element_key("task");

        let position = cancel(&mut engine, task);
        assert_eq!(
            engine.response(position).metadata.rejection_type,
            Some(RejectionType::NotFound)
        );
    }
}

// =============================================================================
// SECTION 7: DETERMINISTIC REPLAY
// =============================================================================

mod replay {
    use super::*;
    use proptest::prelude::*;

    /// an engine that ran a bit of everything
    fn busy_engine() -> Engine {
        let mut engine = Engine::new();
        engine.deploy(service_task_workflow());
        engine.deploy(timer_workflow());
        engine.deploy(message_workflow());
        engine.create_instance("order", json!({"orderId": 1}));
        engine.create_instance("delay", json!({}));
        engine.create_instance("shipping", json!({"orderId": "o-1"}));
        engine.create_instance("shipping", json!({}));
        let job_key = engine.activate("payment", 1)[0];
        engine.command(job_key, Intent::Complete, job_with_payload(json!({"paid": true})));
        engine.command(0, Intent::Publish, message("order-paid", "o-1", "", 5_000, json!({})));
        engine.advance(2_000);
        engine
    }

    fn replayed(log: &[Record], from: usize, processor: &mut StreamProcessor) -> Vec<Vec<u8>> {
        let mut produced = Vec::new();
        for record in &log[from..] {
            for follow_up in processor.process(record) {
                produced.push(follow_up.encode().unwrap());
            }
        }
        produced
    }

    #[test]
    fn replaying_the_log_rebuilds_byte_equal_state() {
        let engine = busy_engine();
        let mut replica = StreamProcessor::new(PARTITION);

        let produced = replayed(&engine.log, 0, &mut replica);

        assert_eq!(
            replica.state().to_bytes().unwrap(),
            engine.state().to_bytes().unwrap()
        );
        assert_eq!(replica.last_processed_position(), engine.log.len() as u64);

        // and produces exactly the follow-ups that are in the log
        let written: Vec<Vec<u8>> = engine
            .log
            .iter()
            .filter(|r| r.source_position > 0)
            .map(|r| r.encode().unwrap())
            .collect();
        assert_eq!(produced, written);
    }

    #[test]
    fn replaying_from_a_snapshot_matches_replaying_from_scratch() {
        let engine = busy_engine();
        let mut first = StreamProcessor::new(PARTITION);
        let half = engine.log.len() / 2;
        replayed(&engine.log, 0, &mut first);

        let mut prefix = StreamProcessor::new(PARTITION);
        replayed(&engine.log[..half], 0, &mut prefix);
        let snapshot = Snapshot {
            position: prefix.last_processed_position(),
            state: prefix.state().clone(),
        };

        let mut restored = StreamProcessor::new(PARTITION);
        restored.restore(Some(snapshot));
        replayed(&engine.log, half, &mut restored);

        assert_eq!(
            restored.state().to_bytes().unwrap(),
            first.state().to_bytes().unwrap()
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(u32),
        Activate(i32),
        Complete(u64),
        Fail(u64, u32),
        UpdateRetries(u64, u32),
        Cancel(u64),
        Advance(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..3).prop_map(Op::Create),
            (1i32..3).prop_map(Op::Activate),
            (1u64..8).prop_map(Op::Complete),
            (1u64..8, 0u32..2).prop_map(|(k, r)| Op::Fail(k, r)),
            (1u64..8, 0u32..2).prop_map(|(k, r)| Op::UpdateRetries(k, r)),
            (1u64..8).prop_map(Op::Cancel),
            (1u64..20_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn any_job_history_replays_to_the_same_state(ops in prop::collection::vec(op(), 1..40)) {
            let mut engine = Engine::new();
            for op in ops {
                match op {
                    Op::Create(retries) => {
                        engine.command(0, Intent::Create, job("payment", retries));
                    }
                    Op::Activate(amount) => {
                        engine.command(0, Intent::Activate, batch("payment", amount, 5_000));
                    }
                    Op::Complete(key) => {
                        engine.command(key, Intent::Complete, job_with_payload(json!({"n": key})));
                    }
                    Op::Fail(key, retries) => {
                        engine.command(key, Intent::Fail, failure(retries, "boom"));
                    }
                    Op::UpdateRetries(key, retries) => {
                        engine.command(key, Intent::UpdateRetries, failure(retries, ""));
                    }
                    Op::Cancel(key) => {
                        engine.command(key, Intent::Cancel, job("payment", 0));
                    }
                    Op::Advance(by) => {
                        let now = engine.now + by;
                        engine.advance(now);
                    }
                }
            }

            let mut replica = StreamProcessor::new(PARTITION);
            replayed(&engine.log, 0, &mut replica);
            prop_assert_eq!(
                replica.state().to_bytes().unwrap(),
                engine.state().to_bytes().unwrap()
            );

            // every command got exactly one event or rejection
            for record in engine.log.iter().filter(|r| r.kind() == RecordKind::Command && r.source_position == 0) {
                let answers = engine
                    .log
                    .iter()
                    .filter(|r| r.source_position == record.position && r.kind() != RecordKind::Command)
                    .filter(|r| r.record_type() == record.record_type())
                    .count();
                prop_assert!(answers >= 1);
            }
        }
    }
}

// =============================================================================
// SECTION 8: SINGLE NODE PARTITION
// =============================================================================

fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(name, 26501)
}

/// ticks one partition without peers
struct Single {
    partition: Partition,
    now: u64,
}

impl Single {
    fn new(config: EngineConfig) -> Self {
        let mut partition =
            Partition::in_memory(config, RaftConfig::default(), PARTITION, endpoint("a")).unwrap();
        partition.bootstrap().unwrap();
        Self { partition, now: 0 }
    }

    fn tick(&mut self) {
        self.now += 10;
        self.partition.do_work(self.now).unwrap();
    }

    fn lead(&mut self) {
        for _ in 0..200 {
            self.tick();
            if self.partition.is_leader() {
                return;
            }
        }
        panic!("single node did not become leader");
    }

    fn run_for(&mut self, ms: u64) {
        let until = self.now + ms;
        while self.now < until {
            self.tick();
        }
    }

    fn request(&mut self, command: ClientCommand) -> ClientResponse {
        let mut reply = self.partition.handle().submit(command).unwrap();
        for _ in 0..100 {
            self.tick();
            if let Some(result) = reply.try_recv().unwrap() {
                return result.unwrap();
            }
        }
        panic!("no response");
    }
}

mod single_partition {
    use super::*;

    #[test]
    fn commands_are_answered_through_the_handle() {
        let mut node = Single::new(EngineConfig::default());
        node.lead();

        let response = node.request(ClientCommand::new(Intent::Create, job("payment", 3)));
        assert_eq!(response.partition_id, PARTITION);
        assert_eq!(response.record.intent(), Intent::Created);
        assert!(!response.is_rejection());
        let key = response.record.key;

        let response = node.request(ClientCommand::with_key(
            key + 10,
            Intent::Complete,
            job_with_payload(json!({})),
        ));
        assert!(response.is_rejection());
        assert_eq!(
            response.record.metadata.rejection_reason,
            format!("Expected to complete job {}, but no such job exists", key + 10)
        );
        assert!(node.partition.state().jobs.exists(key));
    }

    #[test]
    fn request_ids_are_unique_and_direct_submissions_land_in_take_responses() {
        let mut node = Single::new(EngineConfig::default());
        node.lead();

        let first = node
            .partition
            .submit(ClientCommand::new(Intent::Create, job("payment", 3)))
            .unwrap();
        let second = node
            .partition
            .submit(ClientCommand::new(Intent::Create, job("payment", 3)))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(first >> 32, node.partition.raft().term());

        node.run_for(100);
        let responses = node.partition.take_responses();
        let ids: BTreeSet<u64> = responses.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, [first, second].into_iter().collect());
        assert!(node.partition.take_responses().is_empty());
    }

    #[test]
    fn submitting_to_a_follower_is_refused() {
        let mut partition =
            Partition::in_memory(EngineConfig::default(), RaftConfig::default(), PARTITION, endpoint("a"))
                .unwrap();
        partition
            .bootstrap_with(vec![endpoint("a"), endpoint("b"), endpoint("c")])
            .unwrap();

        let direct = partition.submit(ClientCommand::new(Intent::Create, job("payment", 3)));
        assert!(matches!(direct, Err(EngineError::NotLeader { partition_id: PARTITION, .. })));

        let mut reply = partition
            .handle()
            .submit(ClientCommand::new(Intent::Create, job("payment", 3)))
            .unwrap();
        partition.do_work(10).unwrap();
        let result = reply.try_recv().unwrap().expect("answered in the same tick");
        assert!(matches!(result, Err(EngineError::NotLeader { .. })));
    }

    #[test]
    fn workflow_runs_through_the_partition() {
        let mut node = Single::new(EngineConfig::default());
        node.lead();

        let deployed = node.request(ClientCommand::new(Intent::Create, deployment(vec![service_task_workflow()])));
        assert_eq!(deployed.record.intent(), Intent::Created);
        let created = node.request(ClientCommand::new(Intent::Create, instance_of("order", json!({}))));
        assert_eq!(created.record.intent(), Intent::ElementReady);
        node.run_for(100);

        let activated = node.request(ClientCommand::new(Intent::Activate, batch("payment", 1, 10_000)));
        let job_key = activated.record.value.as_job_batch().unwrap().job_keys[0];
        let completed = node.request(ClientCommand::with_key(
            job_key,
            Intent::Complete,
            job_with_payload(json!({"ok": true})),
        ));
        assert_eq!(completed.record.intent(), Intent::Completed);
        node.run_for(100);

        assert!(node.partition.state().elements.is_empty());
        let records = node.partition.records();
        assert!(records.iter().any(|r| {
            r.intent() == Intent::ElementCompleted
                && r.value.as_workflow_instance().map_or(false, |v| v.element_type == ElementType::Process)
        }));
        assert_eq!(node.partition.last_processed_position(), node.partition.raft().commit_position());
    }

    #[test]
    fn leader_times_out_expired_jobs() {
        let config = EngineConfig::builder()
            .job_timeout_check_interval(50)
            .build()
            .unwrap();
        let mut node = Single::new(config);
        node.lead();

        let created = node.request(ClientCommand::new(Intent::Create, job("payment", 3)));
        node.request(ClientCommand::new(Intent::Activate, batch("payment", 1, 100)));
        node.run_for(300);

        let timed_out: Vec<u64> = node
            .partition
            .records()
            .iter()
            .filter(|r| r.intent() == Intent::TimedOut)
            .map(|r| r.key)
            .collect();
        assert_eq!(timed_out, vec![created.record.key]);
    }

    #[test]
    fn snapshots_are_taken_once_the_period_elapsed() {
        let config = EngineConfig::builder().snapshot_period(200).build().unwrap();
        let mut node = Single::new(config);
        node.lead();
        node.request(ClientCommand::new(Intent::Create, job("payment", 3)));

        node.run_for(300);
        assert!(node.partition.snapshot_position() > 0);
        assert!(node.partition.snapshot_position() <= node.partition.last_processed_position());
    }

    #[test]
    fn snapshot_can_be_requested_through_the_handle() {
        let mut node = Single::new(EngineConfig::default());
        node.lead();
        node.request(ClientCommand::new(Intent::Create, job("payment", 3)));
        node.run_for(100);

        node.partition.handle().request_snapshot().unwrap();
        node.tick();
        assert_eq!(node.partition.snapshot_position(), node.partition.last_processed_position());
    }
}

// =============================================================================
// SECTION 9: REPLICATED PARTITION
// =============================================================================

/// every frame goes through the codec, delivered one tick after it was sent
struct Cluster {
    partitions: BTreeMap<Endpoint, Partition>,
    in_flight: Vec<Envelope>,
    isolated: BTreeSet<Endpoint>,
    now: u64,
}

impl Cluster {
    fn new(names: &[&str]) -> Self {
        let members: Vec<Endpoint> = names.iter().map(|n| endpoint(n)).collect();
        let mut partitions = BTreeMap::new();
        for member in &members {
            let mut partition = Partition::in_memory(
                EngineConfig::default(),
                RaftConfig::default(),
                PARTITION,
                member.clone(),
            )
            .unwrap();
            partition.bootstrap_with(members.clone()).unwrap();
            partitions.insert(member.clone(), partition);
        }
        Self {
            partitions,
            in_flight: Vec::new(),
            isolated: BTreeSet::new(),
            now: 0,
        }
    }

    fn partition(&self, endpoint: &Endpoint) -> &Partition {
        &self.partitions[endpoint]
    }

    fn partition_mut(&mut self, endpoint: &Endpoint) -> &mut Partition {
        self.partitions.get_mut(endpoint).unwrap()
    }

    fn tick(&mut self) {
        self.now += 10;
        for envelope in std::mem::take(&mut self.in_flight) {
            if self.isolated.contains(&envelope.from) || self.isolated.contains(&envelope.to) {
                continue;
            }
            if let Some(partition) = self.partitions.get_mut(&envelope.to) {
                let frame = codec::encode(&envelope.message).unwrap();
                partition.receive_frame(envelope.from, &frame);
            }
        }
        for partition in self.partitions.values_mut() {
            partition.do_work(self.now).unwrap();
            self.in_flight.extend(partition.take_outbox());
        }
    }

    fn run_for(&mut self, ms: u64) {
        let until = self.now + ms;
        while self.now < until {
            self.tick();
        }
    }

    /// the single leader among the connected partitions
    fn leader(&self) -> Option<Endpoint> {
        let leaders: Vec<&Endpoint> = self
            .partitions
            .iter()
            .filter(|(e, p)| p.is_leader() && !self.isolated.contains(*e))
            .map(|(e, _)| e)
            .collect();
        match leaders.as_slice() {
            [leader] => Some((*leader).clone()),
            _ => None,
        }
    }

    fn elect(&mut self) -> Endpoint {
        for _ in 0..500 {
            self.tick();
            if let Some(leader) = self.leader() {
                return leader;
            }
        }
        panic!("no leader elected");
    }

    fn request(&mut self, leader: &Endpoint, command: ClientCommand) -> ClientResponse {
        let request_id = self.partition_mut(leader).submit(command).unwrap();
        for _ in 0..200 {
            self.tick();
            let responses = self.partition_mut(leader).take_responses();
            if let Some(response) = responses.into_iter().find(|r| r.request_id == request_id) {
                return response;
            }
        }
        panic!("no response");
    }

    fn count(&self, endpoint: &Endpoint, record_type: RecordType, intent: Intent) -> usize {
        self.partition(endpoint)
            .records()
            .iter()
            .filter(|r| r.kind() == RecordKind::Event)
            .filter(|r| r.record_type() == record_type && r.intent() == intent)
            .count()
    }
}

mod replicated_partition {
    use super::*;

    #[test]
    fn followers_apply_the_same_records_without_writing() {
        let mut cluster = Cluster::new(&["a", "b", "c"]);
        let leader = cluster.elect();

        cluster.request(&leader, ClientCommand::new(Intent::Create, deployment(vec![service_task_workflow()])));
        cluster.request(&leader, ClientCommand::new(Intent::Create, instance_of("order", json!({"n": 1}))));
        cluster.run_for(500);

        let commit = cluster.partition(&leader).raft().commit_position();
        let expected = cluster.partition(&leader).state().to_bytes().unwrap();
        for (endpoint, partition) in &cluster.partitions {
            assert_eq!(partition.last_processed_position(), commit, "{}", endpoint);
            assert_eq!(partition.state().to_bytes().unwrap(), expected, "{}", endpoint);
            assert_eq!(cluster.count(endpoint, RecordType::Job, Intent::Created), 1, "{}", endpoint);
        }
    }

    #[test]
    fn new_leader_continues_without_duplicating_follow_ups() {
        let mut cluster = Cluster::new(&["a", "b", "c"]);
        let leader = cluster.elect();
        let created = cluster.request(&leader, ClientCommand::new(Intent::Create, job("payment", 3)));
        cluster.run_for(300);

        cluster.isolated.insert(leader.clone());
        let successor = cluster.elect();
        assert_ne!(successor, leader);

        let completed = cluster.request(
            &successor,
            ClientCommand::with_key(created.record.key, Intent::Complete, job_with_payload(json!({}))),
        );
        assert_eq!(completed.record.intent(), Intent::Completed);
        assert_eq!(completed.request_id >> 32, cluster.partition(&successor).raft().term());

        // answered once written, counted once committed by the remaining majority
        let committed = completed.record.clone();
        cluster.run_for(300);
        assert_eq!(cluster.count(&successor, RecordType::Job, Intent::Created), 1);
        assert_eq!(cluster.count(&successor, RecordType::Job, Intent::Completed), 1);
        let completed_event = cluster
            .partition(&successor)
            .records()
            .into_iter()
            .find(|r| r.kind() == RecordKind::Event && r.intent() == Intent::Completed)
            .unwrap();
        assert_eq!(completed_event.key, committed.key);

        cluster.isolated.clear();
        cluster.run_for(1_000);

        let expected = cluster.partition(&successor).state().to_bytes().unwrap();
        for (endpoint, partition) in &cluster.partitions {
            assert_eq!(partition.state().to_bytes().unwrap(), expected, "{}", endpoint);
            assert_eq!(cluster.count(endpoint, RecordType::Job, Intent::Created), 1, "{}", endpoint);
            assert!(partition.state().jobs.is_empty(), "{}", endpoint);
        }
    }
}

// =============================================================================
// SECTION 10: RESTART
// =============================================================================

mod restart {
    use super::*;
    use tempfile::tempdir;

    fn open(storage: &FileStorage) -> Single {
        let partition = Partition::open(
            EngineConfig::default(),
            RaftConfig::default(),
            storage,
            PARTITION,
            endpoint("a"),
        )
        .unwrap();
        Single { partition, now: 0 }
    }

    #[test]
    fn partition_recovers_from_snapshot_and_log() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let (state, processed) = {
            let mut node = open(&storage);
            node.partition.bootstrap().unwrap();
            node.lead();
            node.request(ClientCommand::new(Intent::Create, deployment(vec![service_task_workflow()])));
            node.request(ClientCommand::new(Intent::Create, instance_of("order", json!({}))));
            node.run_for(100);
            node.partition.take_snapshot().unwrap();

            node.request(ClientCommand::new(Intent::Create, job("cleanup", 1)));
            node.run_for(100);
            (
                node.partition.state().to_bytes().unwrap(),
                node.partition.last_processed_position(),
            )
        };

        let mut node = open(&storage);
        assert!(node.partition.snapshot_position() > 0);
        assert!(node.partition.snapshot_position() < processed);
        node.partition.start().unwrap();
        node.lead();
        node.run_for(100);

        assert!(node.partition.last_processed_position() >= processed);
        assert_eq!(node.partition.state().to_bytes().unwrap(), state);

        // nothing was written twice while reprocessing
        let created_jobs = node
            .partition
            .records()
            .iter()
            .filter(|r| r.record_type() == RecordType::Job && r.intent() == Intent::Created)
            .count();
        assert_eq!(created_jobs, 2);
    }

    #[test]
    fn restart_without_snapshot_replays_everything() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let state = {
            let mut node = open(&storage);
            node.partition.bootstrap().unwrap();
            node.lead();
            node.request(ClientCommand::new(Intent::Create, job("payment", 3)));
            node.request(ClientCommand::new(Intent::Create, job("payment", 3)));
            node.run_for(100);
            node.partition.state().to_bytes().unwrap()
        };

        let mut node = open(&storage);
        assert_eq!(node.partition.snapshot_position(), 0);
        node.partition.start().unwrap();
        node.lead();
        node.run_for(100);

        assert_eq!(node.partition.state().to_bytes().unwrap(), state);
        assert_eq!(node.partition.state().jobs.len(), 2);
    }
}
