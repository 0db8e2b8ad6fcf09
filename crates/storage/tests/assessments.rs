use storage::models::{NewAssessment, NewReport};
use storage::{
    category_counts, get_assessment, insert_assessment, insert_report, latest_report,
    list_assessments, open,
};

fn sample(category: &str, probability: f64) -> NewAssessment {
    NewAssessment {
        created_at: "2026-10-19T08:00:00Z".to_string(),
        model: "Random Forest".to_string(),
        probability,
        percent: (probability * 100.0).floor() as i64,
        category: category.to_string(),
        input_json: "{}".to_string(),
        factors_json: "[]".to_string(),
    }
}

#[tokio::test]
async fn assessments_round_trip_and_list_newest_first() {
    let pool = open("sqlite::memory:").await.unwrap();

    let low = insert_assessment(&pool, &sample("LOW", 0.12)).await.unwrap();
    let high = insert_assessment(&pool, &sample("HIGH", 0.91)).await.unwrap();
    assert!(high > low);

    let fetched = get_assessment(&pool, high).await.unwrap().unwrap();
    assert_eq!(fetched.category, "HIGH");
    assert_eq!(fetched.percent, 91);

    let all = list_assessments(&pool, 10, None).await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![high, low]);

    let only_low = list_assessments(&pool, 10, Some("low")).await.unwrap();
    assert_eq!(only_low.len(), 1);
    assert_eq!(only_low[0].id, low);

    assert!(get_assessment(&pool, 9999).await.unwrap().is_none());
}

#[tokio::test]
async fn latest_report_wins_and_counts_group_by_category() {
    let pool = open("sqlite::memory:").await.unwrap();
    let id = insert_assessment(&pool, &sample("MODERATE", 0.55)).await.unwrap();
    insert_assessment(&pool, &sample("MODERATE", 0.61)).await.unwrap();
    insert_assessment(&pool, &sample("HIGH", 0.8)).await.unwrap();

    assert!(latest_report(&pool, id).await.unwrap().is_none());
    for by in ["template", "openai"] {
        insert_report(
            &pool,
            &NewReport {
                assessment_id: id,
                created_at: "2026-10-19T08:00:00Z".to_string(),
                generated_by: by.to_string(),
                report_json: "{}".to_string(),
                markdown: format!("# report by {by}"),
            },
        )
        .await
        .unwrap();
    }
    let latest = latest_report(&pool, id).await.unwrap().unwrap();
    assert_eq!(latest.generated_by, "openai");

    let counts = category_counts(&pool).await.unwrap();
    let pairs: Vec<(String, i64)> = counts.into_iter().map(|c| (c.category, c.count)).collect();
    assert_eq!(
        pairs,
        vec![("HIGH".to_string(), 1), ("MODERATE".to_string(), 2)]
    );
}
