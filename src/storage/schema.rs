//! Table definitions. Every statement is idempotent and runs on each connect.

pub(super) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS responders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        policy TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        current_index INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_members (
        schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
        responder_id INTEGER NOT NULL REFERENCES responders(id),
        position INTEGER NOT NULL,
        PRIMARY KEY (schedule_id, responder_id),
        UNIQUE (schedule_id, position)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        schedule_id INTEGER NOT NULL REFERENCES schedules(id),
        repo TEXT NOT NULL,
        issue_number INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL,
        assignee_id INTEGER REFERENCES responders(id),
        created_at TEXT NOT NULL,
        assigned_at TEXT,
        acked_at TEXT,
        completed_at TEXT
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tasks_one_open_per_issue
        ON tasks(schedule_id, repo, issue_number) WHERE status != 'completed';
    "#,
    r#"CREATE INDEX IF NOT EXISTS tasks_status_assigned_at ON tasks(status, assigned_at);"#,
    r#"
    CREATE TABLE IF NOT EXISTS task_assignments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL REFERENCES tasks(id),
        responder_id INTEGER NOT NULL REFERENCES responders(id),
        assigned_at TEXT NOT NULL,
        acked_at TEXT,
        ended_at TEXT,
        end_reason TEXT
    );
    "#,
    r#"CREATE INDEX IF NOT EXISTS task_assignments_task ON task_assignments(task_id);"#,
];
