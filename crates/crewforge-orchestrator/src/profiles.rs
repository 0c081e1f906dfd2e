use crate::engine::RunOptions;
use crate::topology::{CallbackKind, TaskConfig, Topology};
use crewforge_agent::WorkerConfig;
use crewforge_core::TaskId;
use crewforge_tools::ToolTimeouts;

/// Tool names used by the article crew.
pub const SEARCH_TOOL: &str = "search";
/// Name of the page-reading tool.
pub const READ_PAGE_TOOL: &str = "read_page";
/// Name of the translation tool.
pub const TRANSLATE_TOOL: &str = "translate";

/// The article crew: three research tasks run concurrently, a writer turns
/// two of them into an article, and a manager oversees the result and has it
/// translated.
///
/// ```text
/// list_ideas ─────┐
/// list_history ───┴─> write_article ─┬─> manager_review
/// list_tendency ─────────────────────┘
///                     write_article ───> translate_article (final)
/// ```
pub fn article_crew(topic: &str, language: &str) -> Topology {
    let research_tools = [SEARCH_TOOL, READ_PAGE_TOOL];

    let workers = vec![
        WorkerConfig::new(
            "manager",
            "Project Manager",
            "Coordinate the project to ensure a seamless integration of research findings into compelling narratives",
        )
        .with_backstory(
            "With a strategic mindset and a knack for leadership, you excel at guiding teams towards \
             their goals, ensuring projects not only meet but exceed expectations.",
        )
        .with_delegation(["researcher", "writer", "translator"])
        .with_tools([TRANSLATE_TOOL])
        .with_max_iterations(10)
        .with_rate_limit(20),
        WorkerConfig::new(
            "researcher",
            "Senior Researcher",
            format!("Uncover groundbreaking technologies around {topic}"),
        )
        .with_backstory(
            "Driven by curiosity, you're at the forefront of innovation, eager to explore and share \
             knowledge that could change the world.",
        )
        .with_tools(research_tools),
        WorkerConfig::new(
            "writer",
            "Writer",
            format!("Narrate compelling tech stories around {topic}"),
        )
        .with_backstory(
            "With a flair for simplifying complex topics, you craft engaging narratives that captivate \
             and educate, bringing new discoveries to light in an accessible manner.",
        )
        .with_tools(research_tools),
        WorkerConfig::new(
            "translator",
            "Translator",
            format!("Translate English text to {language}"),
        )
        .with_backstory(format!(
            "You are a helpful assistant that translates English to {language}."
        ))
        .with_tools([TRANSLATE_TOOL]),
    ];

    let tasks = vec![
        TaskConfig::new(
            "list_ideas",
            "researcher",
            format!("List 10 interesting ideas to explore for an article about {topic}."),
        )
        .expecting("Bullet point list of 10 ideas for an article.")
        .with_tools(research_tools),
        TaskConfig::new(
            "list_history",
            "researcher",
            format!("Research the history of {topic} and identify the 10 most important events."),
        )
        .expecting("Bullet point list of 10 important events.")
        .with_tools(research_tools),
        TaskConfig::new(
            "list_tendency",
            "researcher",
            format!(
                "Search for trends and progress in {topic} and identify the 5 most disruptive trends."
            ),
        )
        .expecting("Bullet point list of the 5 most relevant disruptive trends.")
        .with_tools(research_tools),
        TaskConfig::new(
            "write_article",
            "writer",
            format!(
                "Compose an insightful article on {topic}, including its history and the latest \
                 interesting ideas and actual solutions."
            ),
        )
        .expecting(format!(
            "A 1000 words article on {topic} structured in 4 paragraphs, each with a summary title."
        ))
        .depends_on(["list_ideas", "list_history"])
        .with_tools(research_tools)
        .with_callback(CallbackKind::Log)
        .sequential(),
        TaskConfig::new(
            "manager_review",
            "manager",
            format!(
                "Oversee the integration of research findings and narrative development to produce a \
                 final comprehensive report on {topic}. Ensure the research is accurately represented \
                 and the narrative is engaging and informative."
            ),
        )
        .expecting(format!(
            "A final comprehensive article that combines the research findings, narrative and trends on {topic}."
        ))
        .depends_on(["write_article", "list_tendency"])
        .sequential(),
        TaskConfig::new(
            "translate_article",
            "manager",
            format!("Translate the text into technical {language}."),
        )
        .expecting(format!("A perfect text written in {language}."))
        .depends_on(["write_article"])
        .with_tools([TRANSLATE_TOOL])
        .sequential(),
    ];

    Topology {
        final_task: Some(TaskId::new("translate_article")),
        run: RunOptions::default().with_max_in_flight(3),
        tools: ToolTimeouts::default(),
        workers,
        tasks,
    }
}
