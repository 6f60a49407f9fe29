//! Fixed domain knowledge the SQL prompt is assembled from: business rules,
//! table documentation, and worked examples for the time-management schema.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Business rules included verbatim in every generation prompt.
pub const BUSINESS_RULES: &str = "\
Time Management System Business Rules:

1. ABSENCE REASONS (absence table):
   - PI = Personal time off
   - SICK = Sick leave
   - VACATION = Vacation time

2. ACTIVITY TYPES (activity table):
   - Activities have a 'type' field (REGULAR, OVERTIME, DOUBLE-TIME, etc.)
   - Activities have an 'active' field ('true'/'false') for status
   - Activities have rate_of_pay for compensation calculations

3. TIME ENTRY WORKFLOW (time_entry.status_id):
   - 0 = NEW, 1 = SENT_FOR_APPROVAL, 2 = APPROVED, 3 = DISAPPROVED, 4 = POSTED
   - Only POSTED (4) entries count toward payroll totals
   - Hours: if the begin/end time difference is zero use the 'unit' column,
     otherwise compute from the time difference

4. USER MANAGEMENT:
   - Users have an enabled field ('true'/'false') for active status
   - Manager relationships are tracked in user_manager
   - Location assignments are tracked in user_locations

5. POSTING AND DATES:
   - posting_date manages payroll periods; cut_off_date is the submission deadline
";

/// Documentation for one warehouse table.
pub struct TableDoc {
    pub description: &'static str,
    pub business_context: &'static str,
    pub columns: &'static [(&'static str, &'static str)],
}

lazy_static! {
    /// Table and column documentation keyed by table name.
    pub static ref TABLE_DOCUMENTATION: HashMap<&'static str, TableDoc> = {
        let mut docs = HashMap::new();

        docs.insert("employee", TableDoc {
            description: "Employee master data including personal information and employment details",
            business_context: "Employees create time entries, take absences, and flow through the approval workflow.",
            columns: &[
                ("id", "Unique identifier for each employee"),
                ("first_name", "Employee's first name"),
                ("last_name", "Employee's last name"),
                ("active", "Whether the employee is currently active ('true'/'false')"),
                ("hire_date", "Date when the employee was hired"),
                ("location_id", "Foreign key to location - primary work location"),
                ("department", "Department or division the employee belongs to"),
                ("job_title", "Employee's job title or position"),
                ("supervisor_id", "Foreign key to employee - direct supervisor"),
            ],
        });

        docs.insert("location", TableDoc {
            description: "Physical locations or work sites where employees can work",
            business_context: "Locations are schools, offices, or work sites. Time entries carry a location for cost allocation.",
            columns: &[
                ("id", "Unique identifier for each location"),
                ("code", "Short location code for easy reference"),
                ("name", "Full descriptive name of the location"),
            ],
        });

        docs.insert("activity", TableDoc {
            description: "Work activities or tasks that employees can log time against",
            business_context: "Activities define what work was performed; pay rates and reporting hang off them.",
            columns: &[
                ("id", "Unique identifier for each activity"),
                ("code", "Short code identifier for the activity"),
                ("description", "Full description of the work activity"),
                ("type", "Category of activity (REGULAR, OVERTIME, DOUBLE-TIME, etc.)"),
                ("active", "Whether the activity is currently available for use"),
                ("rate_of_pay", "Hourly rate for this activity"),
            ],
        });

        docs.insert("time_entry", TableDoc {
            description: "Individual time records submitted by employees for payroll processing",
            business_context: "Core time-tracking records. They flow NEW -> SENT_FOR_APPROVAL -> APPROVED/DISAPPROVED -> POSTED before payroll.",
            columns: &[
                ("id", "Unique identifier for each time entry"),
                ("employee_id", "Foreign key to employee - who performed the work"),
                ("activity_id", "Foreign key to activity - type of work performed"),
                ("location_id", "Foreign key to location - where the work was performed"),
                ("begin_date_time", "Start of the work period (DATETIME)"),
                ("end_date_time", "End of the work period (DATETIME)"),
                ("unit", "Hours worked; authoritative when the time difference is zero"),
                ("status_id", "Workflow status (0=NEW, 1=SENT_FOR_APPROVAL, 2=APPROVED, 3=DISAPPROVED, 4=POSTED)"),
            ],
        });

        docs.insert("absence", TableDoc {
            description: "Employee absence records for vacation, sick leave, etc.",
            business_context: "Absence tracking feeds leave management and payroll.",
            columns: &[
                ("id", "Unique identifier for each absence record"),
                ("absence_reason", "Type of absence (PI, SICK, VACATION, ...)"),
                ("amt_used", "Amount of time taken"),
                ("out_date", "Date of the absence"),
                ("employee_id", "Employee who was absent"),
            ],
        });

        docs.insert("posting_date", TableDoc {
            description: "Payroll periods defining when time entries are processed",
            business_context: "Payroll periods control when time entries are collected and paid.",
            columns: &[
                ("id", "Unique identifier for each payroll period"),
                ("posting_date", "Date when payroll is processed"),
                ("cut_off_date", "Last date for submitting time entries in this period"),
                ("active", "Whether this payroll period is currently active"),
            ],
        });

        docs.insert("user_manager", TableDoc {
            description: "Manager-employee relationships for approval workflows",
            business_context: "Determines who can approve time entries and see employee data.",
            columns: &[
                ("manager_id", "User id of the manager"),
                ("user_id", "User id of the employee reporting to this manager"),
            ],
        });

        docs.insert("user_role", TableDoc {
            description: "Role assignments defining user permissions",
            business_context: "Roles determine what actions users can perform.",
            columns: &[
                ("role", "Role name (ADMIN, MANAGER, EMPLOYEE, SECRETARY, ...)"),
                ("user_id", "User who has this role"),
            ],
        });

        docs
    };
}

/// One-line descriptions emitted as comments above each CREATE TABLE in the
/// assembled schema DDL.
pub fn table_description(table: &str) -> Option<&'static str> {
    TABLE_DOCUMENTATION.get(table).map(|doc| doc.description)
}

/// Tables the entity indexer extracts canonical values from.
pub const REQUIRED_SOURCE_TABLES: &[&str] = &["employee", "location", "activity"];

/// Worked question -> SQL examples appended to the generation prompt.
pub const SQL_EXAMPLES: &[(&str, &str)] = &[
    (
        "Which location does Rosalinda Rodriguez work at?",
        "SELECT l.code, l.name FROM employee e JOIN location l ON e.location_id = l.id \
         WHERE LOWER(e.first_name) LIKE '%rosalinda%' AND LOWER(e.last_name) LIKE '%rodriguez%'",
    ),
    (
        "Which locations have the most time entries?",
        "SELECT l.name, l.code, COUNT(te.id) AS time_entry_count FROM location l \
         JOIN time_entry te ON l.id = te.location_id \
         GROUP BY l.id, l.name, l.code ORDER BY time_entry_count DESC",
    ),
    (
        "What are the most used activity codes?",
        "SELECT a.code, a.description, COUNT(te.id) AS usage_count FROM activity a \
         JOIN time_entry te ON a.id = te.activity_id WHERE a.active = 'true' \
         GROUP BY a.id, a.code, a.description ORDER BY usage_count DESC",
    ),
    (
        "Show me pending time entries for approval for location 061",
        "SELECT e.first_name, e.last_name, te.begin_date_time, te.end_date_time, te.unit AS hours \
         FROM time_entry te JOIN employee e ON te.employee_id = e.id \
         JOIN location l ON l.id = te.location_id \
         WHERE te.status_id = 1 AND l.code = '061' ORDER BY te.begin_date_time DESC",
    ),
    (
        "What is the current payroll period?",
        "SELECT posting_date, cut_off_date FROM posting_date WHERE active = 'true' \
         ORDER BY posting_date DESC LIMIT 1",
    ),
];

/// Cheap relevance filter: include a table's documentation when the question
/// mentions the table name or one of its column names.
pub fn relevant_documentation(question: &str) -> String {
    let question_lower = question.to_lowercase();
    let mut sections: Vec<(&str, String)> = Vec::new();

    for (table_name, doc) in TABLE_DOCUMENTATION.iter() {
        let mentioned = question_lower.contains(table_name)
            || doc
                .columns
                .iter()
                .any(|(col, _)| col.len() > 2 && question_lower.contains(col));
        if !mentioned {
            continue;
        }

        let mut section = format!(
            "\nTable: {}\nDescription: {}\nBusiness Context: {}\nKey Columns:\n",
            table_name, doc.description, doc.business_context
        );
        for (col, desc) in doc.columns {
            section.push_str(&format!("  - {}: {}\n", col, desc));
        }
        sections.push((table_name, section));
    }

    // Deterministic order regardless of map iteration.
    sections.sort_by_key(|(name, _)| *name);
    sections.into_iter().map(|(_, s)| s).collect()
}

/// The generation prompt.
pub fn nl2sql_prompt(
    schema_ddl: &str,
    documentation: &str,
    resolution_context: &str,
    conversation_context: &str,
    question: &str,
    row_limit: u64,
) -> String {
    let mut examples = String::new();
    for (q, sql) in SQL_EXAMPLES {
        examples.push_str(&format!("- \"{}\" -> {}\n", q, sql));
    }

    format!(
        r#"You are a SQL expert for a Time Management System hosted in a columnar warehouse. Convert the question into a single valid SQL query.

Database Schema:
{schema}

Business Context:
{rules}

Relevant Table Documentation:
{documentation}
{resolution}{conversation}
Question: {question}

Guidelines:
1. Generate exactly one read-only SELECT statement
2. Limit results to at most {row_limit} rows using a LIMIT clause
3. For aggregations, use proper GROUP BY clauses
4. Apply business rules when relevant (status codes, activity types, workflow states)
5. Use LOWER() for case-insensitive text comparisons
6. Return only the SQL query, no explanations

Examples:
{examples}
SQL Query:"#,
        schema = schema_ddl,
        rules = BUSINESS_RULES,
        documentation = documentation,
        resolution = resolution_context,
        conversation = conversation_context,
        question = question,
        row_limit = row_limit,
        examples = examples,
    )
}
