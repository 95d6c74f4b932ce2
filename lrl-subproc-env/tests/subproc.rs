use lrl_core::{
    envs::ChainTask,
    task_pool::{ProcessWorker, TaskPool, Worker},
};

fn spawn_pool(num_workers: usize, tag: &str) -> TaskPool {
    let workers = (0..num_workers)
        .map(|idx| {
            let socket_name = format!("lrl-subproc-test-{tag}-{}-{idx}.sock", std::process::id());
            let args = vec!["--seed".to_string(), idx.to_string()];
            let worker =
                ProcessWorker::spawn(env!("CARGO_BIN_EXE_lrl-subproc-env"), &args, &socket_name)
                    .unwrap();
            Box::new(worker) as Box<dyn Worker>
        })
        .collect();
    TaskPool::new(workers).unwrap()
}

#[test]
fn process_workers_serve_the_chain_task() {
    let mut pool = spawn_pool(2, "chain");
    assert_eq!(pool.specs().state_dim, 5);
    assert_eq!(pool.specs().action_dim, 2);
    let states = pool.reset().unwrap();
    assert_eq!(states, vec![vec![0., 0., 1., 0., 0.]; 2]);

    let right = ChainTask::tasks()[1].clone();
    pool.reset_task(&right).unwrap();
    assert_eq!(pool.get_task().unwrap(), right);
    pool.step(&[1, 1]).unwrap();
    let snapshots = pool.step(&[1, 1]).unwrap();
    for snapshot in snapshots {
        assert_eq!(snapshot.reward, 1.);
        assert!(snapshot.terminated);
        // auto reset back to the middle cell
        assert_eq!(snapshot.state, vec![0., 0., 1., 0., 0.]);
    }
    pool.close().unwrap();
}

#[test]
fn process_workers_list_tasks() {
    let mut pool = spawn_pool(1, "tasks");
    let tasks = pool.get_all_tasks(false).unwrap();
    assert_eq!(tasks, ChainTask::tasks());
    let random = pool.random_tasks(3, true).unwrap();
    assert_eq!(random.len(), 3);
    assert!(random.iter().all(|task| task.label.as_ref().is_some_and(|l| l.len() == 2)));
}
