//! End-to-end pass over a realistic roster/stats page pair: parse both,
//! merge, and check every stat line can be linked to a player by name key.

use std::collections::HashSet;

use cscr::parse::{roster, stats, RosterRecord};
use cscr::pipeline::merge_rosters;

const ROSTER_PAGE: &str = r#"<html><body>
  <table class="sidearm-table roster-table">
    <thead><tr><th>No.</th><th>Name</th><th>Pos.</th><th>Yr.</th><th>B/T</th><th>Ht.</th><th>Wt.</th><th>Hometown</th></tr></thead>
    <tbody>
      <tr><td>2</td><td><a href="/roster/cole-banks">Banks, Cole</a></td><td>INF</td><td>Sr.</td><td>R/R</td><td>6-0</td><td>190</td><td>Mesa, Ariz.</td></tr>
      <tr><td>7</td><td><a href="/roster/briggs-ellis">Ellis, Briggs</a></td><td>OF</td><td>So.</td><td>L/L</td><td>6-2</td><td>195</td><td>Waco, Texas</td></tr>
      <tr><td>21</td><td><a href="/roster/john-smith">Smith, John</a></td><td>RHP</td><td>Jr.</td><td>R/R</td><td>5-11</td><td>182</td><td>Tulsa, Okla.</td></tr>
      <tr><td>33</td><td><a href="/roster/dan-reyes">Reyes, Dan</a></td><td>C</td><td>Fr.</td><td>R/R</td><td>5-10</td><td>175</td><td>Plano, Texas</td></tr>
      <tr><td>44</td><td><a href="/roster/sam-ford">Ford, Sam</a></td><td>LHP</td><td>Gr.</td><td>L/L</td><td>6-4</td><td>210</td><td>Boise, Idaho</td></tr>
    </tbody>
  </table></body></html>"#;

const STATS_PAGE: &str = r#"<html><body>
  <h2>Batting Statistics</h2>
  <table>
    <thead><tr><th>Player</th><th>AVG</th><th>GP-GS</th><th>AB</th><th>R</th><th>H</th><th>2B</th><th>3B</th><th>HR</th><th>RBI</th><th>BB</th><th>SO</th><th>OBP</th><th>SLG</th></tr></thead>
    <tbody>
      <tr><td>Banks, Cole</td><td>.312</td><td>30 - 30</td><td>112</td><td>22</td><td>35</td><td>8</td><td>0</td><td>5</td><td>28</td><td>14</td><td>20</td><td>.388</td><td>.518</td></tr>
      <tr><td>Ellis, Briggs</td><td>.342</td><td>30 - 28</td><td>120</td><td>25</td><td>41</td><td>10</td><td>1</td><td>4</td><td>31</td><td>18</td><td>25</td><td>.410</td><td>.520</td></tr>
      <tr><td>Ito, Kenji</td><td>.298</td><td>25 - 12</td><td>84</td><td>11</td><td>25</td><td>4</td><td>1</td><td>0</td><td>9</td><td>6</td><td>15</td><td>.350</td><td>.369</td></tr>
      <tr><td>Totals</td><td>.301</td><td>30</td><td>980</td><td>190</td><td>295</td><td>60</td><td>8</td><td>30</td><td>180</td><td>110</td><td>210</td><td>.390</td><td>.470</td></tr>
    </tbody>
  </table>
  <h2>Pitching Statistics</h2>
  <table>
    <thead><tr><th>Player</th><th>ERA</th><th>W</th><th>L</th><th>APP</th><th>GS</th><th>SV</th><th>IP</th><th>H</th><th>ER</th><th>BB</th><th>SO</th></tr></thead>
    <tbody>
      <tr><td>Smith, John</td><td>2.98</td><td>6</td><td>2</td><td>14</td><td>14</td><td>0</td><td>84.1</td><td>70</td><td>28</td><td>22</td><td>95</td></tr>
      <tr><td>Ford, Sam</td><td>3.85</td><td>3</td><td>1</td><td>18</td><td>0</td><td>5</td><td>30.2</td><td>27</td><td>13</td><td>11</td><td>38</td></tr>
      <tr><td>Opponent</td><td>5.40</td><td>12</td><td>18</td><td>30</td><td>30</td><td>4</td><td>250.0</td><td>290</td><td>150</td><td>120</td><td>180</td></tr>
    </tbody>
  </table></body></html>"#;

#[test]
fn roster_and_stats_merge_into_linked_records() {
    let (players, roster_strategy) = roster::parse(ROSTER_PAGE).unwrap();
    assert_eq!(roster_strategy, "labeled-table");
    assert_eq!(players.len(), 5);

    let (team_stats, stats_strategy) = stats::parse(STATS_PAGE).unwrap();
    assert_eq!(stats_strategy, "labeled-table");
    assert_eq!(team_stats.batting.len(), 3);
    assert_eq!(team_stats.pitching.len(), 2);

    let merged = merge_rosters(players, &team_stats);
    // Kenji Ito only shows up in the batting table and gets a minimal record.
    assert_eq!(merged.len(), 6);
    let ito = merged.iter().find(|r| r.name == "Kenji Ito").unwrap();
    assert_eq!(ito.first_name, "Kenji");
    assert!(ito.jersey_number.is_none());

    // Every stat line links to exactly one merged record by name key.
    let keys: HashSet<String> = merged.iter().map(RosterRecord::key).collect();
    assert_eq!(keys.len(), merged.len());
    for line in &team_stats.batting {
        assert!(keys.contains(&line.key()), "unlinked batter {:?}", line.name);
    }
    for line in &team_stats.pitching {
        assert!(keys.contains(&line.key()), "unlinked pitcher {:?}", line.name);
    }
}

#[test]
fn merged_records_keep_roster_detail_over_stat_spelling() {
    let (players, _) = roster::parse(ROSTER_PAGE).unwrap();
    let (team_stats, _) = stats::parse(STATS_PAGE).unwrap();
    let merged = merge_rosters(players, &team_stats);

    // "Ellis, Briggs" on the stats page must not duplicate the roster entry.
    let ellis: Vec<_> = merged.iter().filter(|r| r.last_name == "Ellis").collect();
    assert_eq!(ellis.len(), 1);
    assert_eq!(ellis[0].positions, vec!["OF"]);
    assert_eq!(ellis[0].height_inches, Some(74));
}

#[test]
fn derived_stats_survive_the_full_pass() {
    let (team_stats, _) = stats::parse(STATS_PAGE).unwrap();

    let ellis = team_stats
        .batting
        .iter()
        .find(|l| l.name == "Briggs Ellis")
        .unwrap();
    assert_eq!(ellis.extra_base_hits, Some(15));
    assert_eq!(ellis.ops, Some(0.93));

    let smith = team_stats
        .pitching
        .iter()
        .find(|l| l.name == "John Smith")
        .unwrap();
    assert!((smith.innings_pitched.unwrap() - (84.0 + 1.0 / 3.0)).abs() < 1e-9);
    assert_eq!(smith.k_to_bb, Some(4.32));
}
