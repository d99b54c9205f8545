use polyred::db::Database;
use polyred::models::*;
use speculate2::speculate;

fn configured_session(id: &str) -> Session {
    let config = Configuration::new().with("body", 0.5).with("lid", 0.25);
    let mut session = Session::root(id);
    session.status = SessionStatus::Configured;
    session.configuration = Some(config.clone());
    session.phases = vec![
        Phase::computed("p1", Some(config.clone())),
        Phase::computed("p2", Some(config)),
        Phase::computed("p3", None),
    ];
    session.phases[0].rating = Some(4.0);
    session.unevaluated = vec!["p2".to_string(), "p3".to_string()];
    session
}

fn rating(session: &str, phase: &str, score: f64, batch: u64) -> RatingEvent {
    RatingEvent {
        session_id: session.to_string(),
        phase_id: phase.to_string(),
        configuration: Some(Configuration::new().with("body", 0.5)),
        rating: score,
        batch,
        recorded_at: chrono::Utc::now(),
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "sessions" {
        it "returns none for an unknown session" {
            assert!(db.get_session("ghost").expect("Failed to query").is_none());
        }

        it "round-trips a session with its phases" {
            let session = configured_session("s1");
            db.save_session(&session).expect("Failed to save");

            let loaded = db.get_session("s1").expect("Failed to query").expect("Session missing");
            assert_eq!(loaded, session);
        }

        it "keeps phase order" {
            db.save_session(&configured_session("s1")).expect("Failed to save");
            let loaded = db.get_session("s1").unwrap().unwrap();
            let ids: Vec<_> = loaded.phases.iter().map(|p| p.id.as_str()).collect();
            assert_eq!(ids, vec!["p1", "p2", "p3"]);
        }

        it "replaces phases on save" {
            let mut session = configured_session("s1");
            db.save_session(&session).expect("Failed to save");

            session.clear();
            db.save_session(&session).expect("Failed to save");

            let loaded = db.get_session("s1").unwrap().unwrap();
            assert_eq!(loaded.status, SessionStatus::Created);
            assert!(loaded.phases.is_empty());
            assert!(loaded.configuration.is_none());
            assert!(loaded.unevaluated.is_empty());
        }

        it "keeps the parent of a branch" {
            let source = configured_session("s1");
            let branch = Session::branch_of(&source, "s2");
            db.save_session(&source).unwrap();
            db.save_session(&branch).unwrap();

            let loaded = db.get_session("s2").unwrap().unwrap();
            assert_eq!(loaded.parent.as_deref(), Some("s1"));
            assert_eq!(loaded.root_model, "s1");
        }

        it "updates the status alone" {
            db.save_session(&configured_session("s1")).unwrap();

            assert!(db.set_session_status("s1", SessionStatus::Unreconciled).unwrap());
            assert!(!db.set_session_status("ghost", SessionStatus::Created).unwrap());

            let loaded = db.get_session("s1").unwrap().unwrap();
            assert_eq!(loaded.status, SessionStatus::Unreconciled);
            assert_eq!(loaded.phases.len(), 3);
        }

        it "lists every session" {
            db.save_session(&configured_session("s1")).unwrap();
            db.save_session(&Session::adopted("s2")).unwrap();

            let all = db.get_all_sessions().unwrap();
            assert_eq!(all.len(), 2);
            assert!(all.iter().any(|s| s.id == "s2" && s.adopted));
        }
    }

    describe "lineage events" {
        it "returns events in insertion order" {
            let copy = LineageEdge::copy("s1", "s2");
            let reset = LineageEdge::reset("s2");
            db.append_lineage_event(&copy).unwrap();
            db.append_lineage_event(&reset).unwrap();

            let events = db.get_lineage_events().unwrap();
            assert_eq!(events, vec![copy, reset]);
        }

        it "starts empty" {
            assert!(db.get_lineage_events().unwrap().is_empty());
        }
    }

    describe "rating events" {
        it "filters by session" {
            db.append_rating_events(&[
                rating("s1", "p1", 4.0, 0),
                rating("s2", "p1", 2.0, 1),
                rating("s1", "p2", 1.0, 2),
            ]).unwrap();

            let s1: Vec<_> = db.get_rating_events(Some("s1")).unwrap()
                .into_iter()
                .map(|e| e.phase_id)
                .collect();
            assert_eq!(s1, vec!["p1", "p2"]);
            assert_eq!(db.get_rating_events(None).unwrap().len(), 3);
        }

        it "round-trips every field" {
            let event = rating("s1", "p1", 3.5, 7);
            db.append_rating_events(std::slice::from_ref(&event)).unwrap();
            assert_eq!(db.get_rating_events(Some("s1")).unwrap(), vec![event]);
        }
    }
}
