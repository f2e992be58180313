use eso_meters::output::MemoryOutput;
use eso_meters::run_project;
use pretty_assertions::assert_eq;
use rstest::*;
use serde_json::{json, Value};

#[fixture]
fn project() -> Value {
    json!({
        "SimulationTime": {"start_day": 31, "days": 2, "timesteps_per_hour": 2},
        "Environment": {
            "title": "WINTER RUN",
            "latitude": 51.15,
            "longitude": -0.18,
            "time_zone": 0.0,
            "elevation": 62.0
        },
        "Reporting": {
            "output_variables": [
                {"key": "ZONE1", "variable_name": "Zone Mean Air Temperature", "frequency": "Hourly"},
                {"key": "*", "variable_name": "Zone Mean Air Temperature", "frequency": "Monthly"},
                {"variable_name": "Zone Lights Electricity Energy", "frequency": "Daily"},
                {"variable_name": "Zone Lights Electricty Energy", "frequency": "Daily"}
            ],
            "output_meters": [
                {"name": "Electricity:Facility", "frequency": "Daily"},
                {"name": "Electricity:Facility", "frequency": "Monthly", "cumulative": true, "meter_file_only": true},
                {"name": "Facility Less Fans", "frequency": "Daily"}
            ],
            "custom_decrement_meters": [{
                "name": "Facility Less Fans",
                "resource_type": "Electricity",
                "source_meter": "Electricity:Facility",
                "entries": [{"key": "AHU1", "name": "Fan Electricity Energy"}]
            }]
        },
        "Schedules": {"Always On": vec![1.0; 24]},
        "Variables": [
            {
                "name": "Zone Mean Air Temperature",
                "units": "C",
                "key": "ZONE1",
                "store_type": "Averaged",
                "values": [20.0, 22.0]
            },
            {
                "name": "Zone Lights Electricity Energy [J]",
                "key": "ZONE1",
                "store_type": "Summed",
                "values": [100.0],
                "meter": {
                    "resource_type": "Electricity",
                    "end_use": "InteriorLights",
                    "group": "Building",
                    "zone": "ZONE1"
                }
            },
            {
                "name": "Fan Electricity Energy",
                "units": "J",
                "key": "AHU1",
                "domain": "HVAC",
                "store_type": "Summed",
                "values": [50.0],
                "meter": {"resource_type": "Electricity", "end_use": "Fans", "group": "HVAC"}
            }
        ]
    })
}

fn records_written(contents: &str) -> u64 {
    contents
        .lines()
        .last()
        .and_then(|line| line.strip_prefix(" Number of Records Written="))
        .and_then(|count| count.parse().ok())
        .unwrap()
}

#[rstest]
fn should_write_standard_report(project: Value) {
    let output = MemoryOutput::new();
    let summary = run_project(project.to_string().as_bytes(), &output).unwrap();

    let eso = output.contents("eso").unwrap();
    assert!(eso.starts_with("Program Version,eso-meters "));
    assert!(eso.contains(
        "7,1,ZONE1,Zone Mean Air Temperature [C] !Hourly\n\
         8,9,ZONE1,Zone Mean Air Temperature [C] !Monthly [Value,Min,Day,Hour,Minute,Max,Day,Hour,Minute]\n\
         9,7,ZONE1,Zone Lights Electricity Energy [J] !Daily [Value,Min,Hour,Minute,Max,Hour,Minute]\n"
    ));
    assert!(eso.contains(
        "11,7,Electricity:Facility [J] !Daily [Value,Min,Hour,Minute,Max,Hour,Minute]\n"
    ));
    assert!(!eso.contains("Cumulative Electricity:Facility"));
    assert!(eso.contains("End of Data Dictionary\n1,WINTER RUN,51.15,-0.18,0.00,62.00\n"));

    assert!(eso.contains("\n2,1,1,31,0,1,0.00,60.00,Friday\n7,21\n"));
    assert!(eso.contains("\n3,1,1,31,0,Friday\n9,4800,200,1,60,200,1,60\n11,7200,"));
    assert!(eso.contains("\n13,4800,"));
    assert!(eso.contains("\n4,1,1\n8,21,"));
    assert!(eso.contains("\n3,2,2,1,0,Saturday\n9,4800,"));
    assert!(eso.contains("\n4,2,2\n8,21,"));

    assert!(eso.ends_with(&format!(
        "End of Data\n Number of Records Written={}\n",
        summary.records.standard
    )));
    assert_eq!(records_written(&eso), summary.records.standard as u64);
}

#[rstest]
fn should_write_meter_report(project: Value) {
    let output = MemoryOutput::new();
    let summary = run_project(project.to_string().as_bytes(), &output).unwrap();

    let mtr = output.contents("mtr").unwrap();
    assert!(mtr.contains("12,1,Cumulative Electricity:Facility [J] !Monthly\n"));
    assert!(!mtr.contains("Zone Mean Air Temperature"));
    assert!(mtr.contains("\n4,1,1\n12,7200\n"));
    assert!(mtr.contains("\n4,2,2\n12,14400\n"));
    assert_eq!(records_written(&mtr), summary.records.meter as u64);
}

#[rstest]
fn should_write_setup_reports(project: Value) {
    let output = MemoryOutput::new();
    run_project(project.to_string().as_bytes(), &output).unwrap();

    let mtd = output.contents("mtd").unwrap();
    assert!(mtd.contains(" Meters for 9,ZONE1:Zone Lights Electricity Energy [J]\n"));
    assert!(mtd.contains("  OnCustomDecrementMeter=Facility Less Fans [J]\n"));

    let rdd = output.contents("rdd").unwrap();
    assert_eq!(
        rdd.lines().skip(2).collect::<Vec<_>>(),
        vec![
            "Zone,Average,Zone Mean Air Temperature [C]",
            "Zone,Sum,Zone Lights Electricity Energy [J]",
            "HVAC,Sum,Fan Electricity Energy [J]",
        ]
    );

    let mdd = output.contents("mdd").unwrap();
    assert!(mdd.contains("Zone,Meter,Electricity:Facility [J]\n"));
    assert!(mdd.contains("Zone,Meter,Facility Less Fans [J]\n"));
}

#[rstest]
fn should_summarise_run(project: Value) {
    let output = MemoryOutput::new();
    let summary = run_project(project.to_string().as_bytes(), &output).unwrap();

    assert_eq!(summary.unmatched_requests, 1);
    assert_eq!(
        summary.warnings,
        vec![
            "Output:Variable=*,Zone Lights Electricty Energy,Daily was requested but never matched a registered variable"
                .to_string()
        ]
    );
    assert_eq!(summary.variable_count, 4);
    assert!(output.contents("sql").is_none());
}

#[rstest]
fn should_mirror_records_when_structured(mut project: Value) {
    project["Reporting"]["structured_output"] = json!(true);
    let output = MemoryOutput::new();
    run_project(project.to_string().as_bytes(), &output).unwrap();

    let sql = output.contents("sql").unwrap();
    assert!(sql.lines().count() > 0);
    for line in sql.lines() {
        serde_json::from_str::<Value>(line).unwrap();
    }
}

#[rstest]
fn should_reject_malformed_project() {
    let output = MemoryOutput::new();
    let result = run_project(
        json!({"SimulationTime": {"start_day": 1, "days": 400, "timesteps_per_hour": 2}})
            .to_string()
            .as_bytes(),
        &output,
    );
    assert!(result.is_err());
}
